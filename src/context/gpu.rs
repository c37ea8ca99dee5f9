use std::collections::HashMap;

use generational_arena::Arena;
use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BlendState, Buffer, BufferDescriptor,
    BufferUsages, ColorTargetState, ColorWrites, CommandEncoderDescriptor, CompareFunction,
    DepthStencilState, Device, ErrorFilter, Extent3d, FragmentState, ImageDataLayout, LoadOp,
    MultisampleState, Operations, PipelineCompilationOptions, PipelineLayout,
    PipelineLayoutDescriptor, PrimitiveState, PrimitiveTopology, Queue, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, Sampler, SamplerBindingType, SamplerDescriptor, ShaderModule,
    ShaderModuleDescriptor, ShaderSource, ShaderStages, StoreOp, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureSampleType, TextureUsages, TextureView,
    TextureViewDescriptor, TextureViewDimension, VertexState, COPY_BUFFER_ALIGNMENT,
};

use crate::{
    context::{
        rgba8_len, BufferHandle, LayoutHandle, RenderContext, SamplerHandle, ShaderHandle,
        ShaderStage, TextureHandle, VertexLayout, ViewHandle, ATLAS_SLOT,
    },
    error::{Result, TextError},
    state::RasterizerState,
};

struct Shader {
    module: ShaderModule,
    entry_point: String,
    stage: ShaderStage,
}

/// Where draws land. Set by the host once per frame, typically to the surface texture view.
pub struct RenderTarget {
    pub view: TextureView,
    pub format: TextureFormat,
    pub depth: Option<(TextureView, TextureFormat)>,
}

#[derive(Default)]
struct Bound {
    layout: Option<LayoutHandle>,
    topology: PrimitiveTopology,
    vertex_buffer: Option<BufferHandle>,
    vertex_shader: Option<ShaderHandle>,
    fragment_shader: Option<ShaderHandle>,
    depth_stencil: Option<DepthStencilState>,
    rasterizer: RasterizerState,
    blend: Option<BlendState>,
    samplers: HashMap<u32, SamplerHandle>,
    views: HashMap<u32, ViewHandle>,
}

// wgpu pipelines are immutable, so every distinct combination of bound state gets its own.
#[derive(Debug, Clone, PartialEq)]
struct PipelineKey {
    layout: LayoutHandle,
    vertex_shader: ShaderHandle,
    fragment_shader: ShaderHandle,
    topology: PrimitiveTopology,
    rasterizer: RasterizerState,
    depth_stencil: Option<DepthStencilState>,
    blend: Option<BlendState>,
    color_format: TextureFormat,
    depth_format: Option<TextureFormat>,
}

/// [RenderContext] on top of a wgpu device and queue.
///
/// The texture and sampler bound at [ATLAS_SLOT] are exposed to shaders as
/// `@group(0) @binding(0)` and `@group(0) @binding(1)`. Each draw records its own render pass that loads and stores the
/// current [RenderTarget], and is submitted straight away.
pub struct WgpuContext {
    device: Device,
    queue: Queue,
    target: Option<RenderTarget>,
    bind_group_layout: BindGroupLayout,
    pipeline_layout: PipelineLayout,
    shaders: Arena<Shader>,
    layouts: Arena<VertexLayout>,
    textures: Arena<Texture>,
    views: Arena<TextureView>,
    samplers: Arena<Sampler>,
    buffers: Arena<Buffer>,
    pipelines: Vec<(PipelineKey, RenderPipeline)>,
    bound: Bound,
}

impl WgpuContext {
    pub fn new(device: Device, queue: Queue) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("text bind group layout"),
            entries: &[
                // atlas texture
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // atlas sampler
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("text pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            device,
            queue,
            target: None,
            bind_group_layout,
            pipeline_layout,
            shaders: Arena::new(),
            layouts: Arena::new(),
            textures: Arena::new(),
            views: Arena::new(),
            samplers: Arena::new(),
            buffers: Arena::new(),
            pipelines: Vec::new(),
            bound: Bound::default(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn set_target(&mut self, target: RenderTarget) {
        self.target = Some(target);
    }

    pub fn take_target(&mut self) -> Option<RenderTarget> {
        self.target.take()
    }

    fn with_error_scope<T>(&self, op: impl FnOnce(&Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(ErrorFilter::Validation);
        let value = op(&self.device);
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    fn pipeline_key(&self, target: &RenderTarget) -> Result<PipelineKey> {
        let missing = |what: &str| TextError::Device(format!("draw without a bound {what}"));
        Ok(PipelineKey {
            layout: self.bound.layout.ok_or_else(|| missing("vertex layout"))?,
            vertex_shader: self
                .bound
                .vertex_shader
                .ok_or_else(|| missing("vertex shader"))?,
            fragment_shader: self
                .bound
                .fragment_shader
                .ok_or_else(|| missing("fragment shader"))?,
            topology: self.bound.topology,
            rasterizer: self.bound.rasterizer,
            depth_stencil: self.bound.depth_stencil.clone(),
            blend: self.bound.blend,
            color_format: target.format,
            depth_format: target.depth.as_ref().map(|(_, format)| *format),
        })
    }

    // The pass always carries the target's depth attachment, so the pipeline has to declare one
    // in the same format, even when nothing is bound.
    fn depth_state(key: &PipelineKey) -> Option<DepthStencilState> {
        let depth_format = key.depth_format?;
        let state = key.depth_stencil.clone().unwrap_or(DepthStencilState {
            format: depth_format,
            depth_write_enabled: false,
            depth_compare: CompareFunction::Always,
            stencil: Default::default(),
            bias: Default::default(),
        });
        Some(DepthStencilState {
            format: depth_format,
            ..state
        })
    }

    fn pipeline_index(&mut self, key: PipelineKey) -> Result<usize> {
        if let Some(index) = self.pipelines.iter().position(|(cached, _)| *cached == key) {
            return Ok(index);
        }

        let layout = self
            .layouts
            .get(key.layout.0)
            .ok_or(TextError::Device("bound vertex layout was released".into()))?;
        let vertex = self
            .shaders
            .get(key.vertex_shader.0)
            .filter(|shader| shader.stage == ShaderStage::Vertex)
            .ok_or(TextError::Device("no live vertex shader bound".into()))?;
        let fragment = self
            .shaders
            .get(key.fragment_shader.0)
            .filter(|shader| shader.stage == ShaderStage::Fragment)
            .ok_or(TextError::Device("no live fragment shader bound".into()))?;
        let depth_stencil = Self::depth_state(&key);

        let (pipeline, error) = self.with_error_scope(|device| {
            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some("text pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: VertexState {
                    module: &vertex.module,
                    entry_point: &vertex.entry_point,
                    buffers: &[layout.buffer_layout()],
                    compilation_options: PipelineCompilationOptions::default(),
                },
                primitive: PrimitiveState {
                    topology: key.topology,
                    strip_index_format: None,
                    front_face: key.rasterizer.front_face,
                    cull_mode: key.rasterizer.cull_mode,
                    unclipped_depth: false,
                    polygon_mode: key.rasterizer.polygon_mode,
                    conservative: false,
                },
                depth_stencil,
                multisample: MultisampleState::default(),
                fragment: Some(FragmentState {
                    module: &fragment.module,
                    entry_point: &fragment.entry_point,
                    targets: &[Some(ColorTargetState {
                        format: key.color_format,
                        blend: key.blend,
                        write_mask: ColorWrites::ALL,
                    })],
                    compilation_options: PipelineCompilationOptions::default(),
                }),
                multiview: None,
            })
        });
        if let Some(error) = error {
            return Err(TextError::Device(error.to_string()));
        }

        log::debug!("built text pipeline #{}", self.pipelines.len());
        self.pipelines.push((key, pipeline));
        Ok(self.pipelines.len() - 1)
    }
}

impl RenderContext for WgpuContext {
    fn create_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
        entry_point: &str,
    ) -> Result<ShaderHandle> {
        let (module, error) = self.with_error_scope(|device| {
            device.create_shader_module(ShaderModuleDescriptor {
                label: Some(entry_point),
                source: ShaderSource::Wgsl(source.into()),
            })
        });
        if let Some(error) = error {
            return Err(TextError::Shader(error.to_string()));
        }
        Ok(ShaderHandle(self.shaders.insert(Shader {
            module,
            entry_point: entry_point.into(),
            stage,
        })))
    }

    fn create_vertex_layout(&mut self, layout: VertexLayout) -> Result<LayoutHandle> {
        layout.validate()?;
        Ok(LayoutHandle(self.layouts.insert(layout)))
    }

    fn create_texture(
        &mut self,
        label: Option<&str>,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<TextureHandle> {
        let expected = rgba8_len(width, height)
            .ok_or(TextError::Device(format!("{width}x{height} texture is too large")))?;
        if data.len() != expected {
            return Err(TextError::Device(format!(
                "texture data is {} bytes, expected {expected}",
                data.len()
            )));
        }
        let size = Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let (texture, error) = self.with_error_scope(|device| {
            device.create_texture(&TextureDescriptor {
                label,
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::Rgba8UnormSrgb,
                usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                view_formats: &[],
            })
        });
        if let Some(error) = error {
            return Err(TextError::Device(error.to_string()));
        }
        self.queue.write_texture(
            texture.as_image_copy(),
            data,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );
        Ok(TextureHandle(self.textures.insert(texture)))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> Result<ViewHandle> {
        let view = self
            .textures
            .get(texture.0)
            .ok_or(TextError::Device("view of a released texture".into()))?
            .create_view(&TextureViewDescriptor::default());
        Ok(ViewHandle(self.views.insert(view)))
    }

    fn create_sampler(&mut self, descriptor: &SamplerDescriptor<'_>) -> Result<SamplerHandle> {
        let (sampler, error) = self.with_error_scope(|device| device.create_sampler(descriptor));
        if let Some(error) = error {
            return Err(TextError::Device(error.to_string()));
        }
        Ok(SamplerHandle(self.samplers.insert(sampler)))
    }

    fn create_vertex_buffer(&mut self, size: u64) -> Result<BufferHandle> {
        let (buffer, error) = self.with_error_scope(|device| {
            device.create_buffer(&BufferDescriptor {
                label: Some("text vertex buffer"),
                size,
                usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        if let Some(error) = error {
            return Err(TextError::Device(error.to_string()));
        }
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn release_shader(&mut self, handle: ShaderHandle) {
        self.shaders.remove(handle.0);
        self.pipelines.retain(|(key, _)| {
            key.vertex_shader != handle && key.fragment_shader != handle
        });
    }

    fn release_vertex_layout(&mut self, handle: LayoutHandle) {
        self.layouts.remove(handle.0);
        self.pipelines.retain(|(key, _)| key.layout != handle);
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures.remove(handle.0) {
            texture.destroy();
        }
    }

    fn release_texture_view(&mut self, handle: ViewHandle) {
        self.views.remove(handle.0);
    }

    fn release_sampler(&mut self, handle: SamplerHandle) {
        self.samplers.remove(handle.0);
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(handle.0) {
            buffer.destroy();
        }
    }

    fn depth_stencil_state(&self) -> Option<DepthStencilState> {
        self.bound.depth_stencil.clone()
    }

    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilState>) {
        self.bound.depth_stencil = state;
    }

    fn rasterizer_state(&self) -> RasterizerState {
        self.bound.rasterizer
    }

    fn set_rasterizer_state(&mut self, state: RasterizerState) {
        self.bound.rasterizer = state;
    }

    fn blend_state(&self) -> Option<BlendState> {
        self.bound.blend
    }

    fn set_blend_state(&mut self, state: Option<BlendState>) {
        self.bound.blend = state;
    }

    fn sampler(&self, slot: u32) -> Option<SamplerHandle> {
        self.bound.samplers.get(&slot).copied()
    }

    fn set_sampler(&mut self, slot: u32, sampler: Option<SamplerHandle>) {
        match sampler {
            Some(sampler) => self.bound.samplers.insert(slot, sampler),
            None => self.bound.samplers.remove(&slot),
        };
    }

    fn set_vertex_layout(&mut self, layout: Option<LayoutHandle>) {
        self.bound.layout = layout;
    }

    fn set_topology(&mut self, topology: PrimitiveTopology) {
        self.bound.topology = topology;
    }

    fn set_vertex_buffer(&mut self, buffer: Option<BufferHandle>) {
        self.bound.vertex_buffer = buffer;
    }

    fn set_vertex_shader(&mut self, shader: Option<ShaderHandle>) {
        self.bound.vertex_shader = shader;
    }

    fn set_fragment_shader(&mut self, shader: Option<ShaderHandle>) {
        self.bound.fragment_shader = shader;
    }

    fn set_texture_view(&mut self, slot: u32, view: Option<ViewHandle>) {
        match view {
            Some(view) => self.bound.views.insert(slot, view),
            None => self.bound.views.remove(&slot),
        };
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<()> {
        let target = self
            .buffers
            .get(buffer.0)
            .ok_or(TextError::BufferWrite("buffer was released".into()))?;
        if data.len() as u64 > target.size() {
            return Err(TextError::BufferWrite(format!(
                "{} bytes don't fit in a {} byte buffer",
                data.len(),
                target.size()
            )));
        }
        if data.len() as u64 % COPY_BUFFER_ALIGNMENT != 0 {
            return Err(TextError::BufferWrite(format!(
                "{} bytes is not a multiple of {COPY_BUFFER_ALIGNMENT}",
                data.len()
            )));
        }
        self.device.push_error_scope(ErrorFilter::Validation);
        self.queue.write_buffer(target, 0, data);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(TextError::BufferWrite(error.to_string())),
            None => Ok(()),
        }
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        let key = self.pipeline_key(
            self.target
                .as_ref()
                .ok_or(TextError::Device("no render target set".into()))?,
        )?;
        let index = self.pipeline_index(key)?;

        let missing = |what: &str| TextError::Device(format!("draw without a bound {what}"));
        let view = self
            .bound
            .views
            .get(&ATLAS_SLOT)
            .and_then(|handle| self.views.get(handle.0))
            .ok_or_else(|| missing("atlas texture view"))?;
        let sampler = self
            .bound
            .samplers
            .get(&ATLAS_SLOT)
            .and_then(|handle| self.samplers.get(handle.0))
            .ok_or_else(|| missing("atlas sampler"))?;
        let vertex_buffer = self
            .bound
            .vertex_buffer
            .and_then(|handle| self.buffers.get(handle.0))
            .ok_or_else(|| missing("vertex buffer"))?;
        let target = self
            .target
            .as_ref()
            .ok_or(TextError::Device("no render target set".into()))?;

        self.device.push_error_scope(ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("text bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("text draw"),
            });

        let color_attachments = [Some(RenderPassColorAttachment {
            view: &target.view,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Load,
                store: StoreOp::Store,
            },
        })];
        let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("text pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: target.depth.as_ref().map(|(view, _)| {
                RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(&self.pipelines[index].1);
        rpass.set_bind_group(0, &bind_group, &[]);
        rpass.set_vertex_buffer(0, vertex_buffer.slice(..));
        rpass.draw(first_vertex..first_vertex + vertex_count, 0..1);
        drop(rpass);

        self.queue.submit([encoder.finish()]);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(TextError::Device(error.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use generational_arena::Index;
    use wgpu::{BlendState, DepthBiasState, StencilState};

    use super::*;

    fn key(
        depth_stencil: Option<DepthStencilState>,
        depth_format: Option<TextureFormat>,
    ) -> PipelineKey {
        let index = Index::from_raw_parts(0, 0);
        PipelineKey {
            layout: LayoutHandle(index),
            vertex_shader: ShaderHandle(index),
            fragment_shader: ShaderHandle(index),
            topology: PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::default(),
            depth_stencil,
            blend: Some(BlendState::ALPHA_BLENDING),
            color_format: TextureFormat::Bgra8UnormSrgb,
            depth_format,
        }
    }

    #[test]
    fn no_depth_attachment_means_no_depth_state() {
        let host = DepthStencilState {
            format: TextureFormat::Depth32Float,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        };
        assert_eq!(WgpuContext::depth_state(&key(None, None)), None);
        assert_eq!(WgpuContext::depth_state(&key(Some(host), None)), None);
    }

    #[test]
    fn unbound_depth_state_neither_tests_nor_writes() {
        let state = WgpuContext::depth_state(&key(None, Some(TextureFormat::Depth24Plus))).unwrap();
        assert_eq!(state.format, TextureFormat::Depth24Plus);
        assert!(!state.depth_write_enabled);
        assert_eq!(state.depth_compare, CompareFunction::Always);
    }

    #[test]
    fn bound_depth_state_takes_the_target_format() {
        let host = DepthStencilState {
            format: TextureFormat::Depth32Float,
            depth_write_enabled: true,
            depth_compare: CompareFunction::LessEqual,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        };
        let state =
            WgpuContext::depth_state(&key(Some(host.clone()), Some(TextureFormat::Depth24Plus)))
                .unwrap();
        assert_eq!(
            state,
            DepthStencilState {
                format: TextureFormat::Depth24Plus,
                ..host
            }
        );
    }
}
