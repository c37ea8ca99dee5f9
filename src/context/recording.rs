use std::collections::HashMap;

use bytemuck::Pod;
use generational_arena::Arena;
use wgpu::{AddressMode, BlendState, DepthStencilState, PrimitiveTopology, SamplerDescriptor};

use crate::{
    context::{
        rgba8_len, BufferHandle, LayoutHandle, RenderContext, SamplerHandle, ShaderHandle,
        ShaderStage, TextureHandle, VertexLayout, ViewHandle, ATLAS_SLOT,
    },
    error::{Result, TextError},
    state::RasterizerState,
};

#[derive(Debug, Clone)]
pub struct RecordedShader {
    pub stage: ShaderStage,
    pub entry_point: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedSampler {
    pub address_mode: [AddressMode; 3],
    pub anisotropy_clamp: u16,
}

/// Everything bound when a draw was issued, plus the vertex bytes it read.
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub vertex_count: u32,
    pub first_vertex: u32,
    pub vertex_buffer: BufferHandle,
    pub vertex_shader: ShaderHandle,
    pub fragment_shader: ShaderHandle,
    pub topology: PrimitiveTopology,
    pub blend: Option<BlendState>,
    pub texture_view: Option<ViewHandle>,
    pub sampler: Option<SamplerHandle>,
    pub bytes: Vec<u8>,
}

impl DrawCall {
    pub fn vertices<T: Pod>(&self) -> Vec<T> {
        self.bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }
}

#[derive(Debug, Default)]
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

/// A [RenderContext] that never touches a GPU.
///
/// Resources live in arenas, buffer writes land in host memory and every draw is appended to
/// [RecordingContext::draws] with a copy of the vertices it consumed.
#[derive(Debug, Default)]
pub struct RecordingContext {
    shaders: Arena<RecordedShader>,
    layouts: Arena<VertexLayout>,
    textures: Arena<(u32, u32)>,
    views: Arena<TextureHandle>,
    samplers: Arena<RecordedSampler>,
    buffers: Arena<Vec<u8>>,
    bound: Bound,
    pub draws: Vec<DrawCall>,
    pub buffers_created: usize,
    pub buffers_released: usize,
    pub fail_next_write: bool,
    pub fail_shader_compile: bool,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects of any kind still alive.
    pub fn live_objects(&self) -> usize {
        self.shaders.len()
            + self.layouts.len()
            + self.textures.len()
            + self.views.len()
            + self.samplers.len()
            + self.buffers.len()
    }

    pub fn buffer_size(&self, handle: BufferHandle) -> Option<u64> {
        self.buffers.get(handle.0).map(|data| data.len() as u64)
    }

    pub fn shader(&self, handle: ShaderHandle) -> Option<&RecordedShader> {
        self.shaders.get(handle.0)
    }

    pub fn sampler_desc(&self, handle: SamplerHandle) -> Option<&RecordedSampler> {
        self.samplers.get(handle.0)
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.bound.topology
    }

    pub fn bound_vertex_buffer(&self) -> Option<BufferHandle> {
        self.bound.vertex_buffer
    }

    pub fn bound_texture_view(&self, slot: u32) -> Option<ViewHandle> {
        self.bound.views.get(&slot).copied()
    }
}

impl RenderContext for RecordingContext {
    fn create_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
        entry_point: &str,
    ) -> Result<ShaderHandle> {
        if self.fail_shader_compile || !source.contains(entry_point) {
            return Err(TextError::Shader(format!(
                "entry point `{entry_point}` not found"
            )));
        }
        let shader = RecordedShader {
            stage,
            entry_point: entry_point.into(),
        };
        Ok(ShaderHandle(self.shaders.insert(shader)))
    }

    fn create_vertex_layout(&mut self, layout: VertexLayout) -> Result<LayoutHandle> {
        layout.validate()?;
        Ok(LayoutHandle(self.layouts.insert(layout)))
    }

    fn create_texture(
        &mut self,
        _label: Option<&str>,
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
        Ok(TextureHandle(self.textures.insert((width, height))))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> Result<ViewHandle> {
        if !self.textures.contains(texture.0) {
            return Err(TextError::Device("view of a released texture".into()));
        }
        Ok(ViewHandle(self.views.insert(texture)))
    }

    fn create_sampler(&mut self, descriptor: &SamplerDescriptor<'_>) -> Result<SamplerHandle> {
        let sampler = RecordedSampler {
            address_mode: [
                descriptor.address_mode_u,
                descriptor.address_mode_v,
                descriptor.address_mode_w,
            ],
            anisotropy_clamp: descriptor.anisotropy_clamp,
        };
        Ok(SamplerHandle(self.samplers.insert(sampler)))
    }

    fn create_vertex_buffer(&mut self, size: u64) -> Result<BufferHandle> {
        self.buffers_created += 1;
        Ok(BufferHandle(self.buffers.insert(vec![0; size as usize])))
    }

    fn release_shader(&mut self, handle: ShaderHandle) {
        self.shaders.remove(handle.0);
    }

    fn release_vertex_layout(&mut self, handle: LayoutHandle) {
        self.layouts.remove(handle.0);
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        self.textures.remove(handle.0);
    }

    fn release_texture_view(&mut self, handle: ViewHandle) {
        self.views.remove(handle.0);
    }

    fn release_sampler(&mut self, handle: SamplerHandle) {
        self.samplers.remove(handle.0);
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        if self.buffers.remove(handle.0).is_some() {
            self.buffers_released += 1;
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
        if std::mem::take(&mut self.fail_next_write) {
            return Err(TextError::BufferWrite("injected map failure".into()));
        }
        let contents = self
            .buffers
            .get_mut(buffer.0)
            .ok_or(TextError::BufferWrite("buffer was released".into()))?;
        if data.len() > contents.len() {
            return Err(TextError::BufferWrite(format!(
                "{} bytes don't fit in a {} byte buffer",
                data.len(),
                contents.len()
            )));
        }
        contents.fill(0);
        contents[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        let missing = |what: &str| TextError::Device(format!("draw without a bound {what}"));
        let layout = self
            .bound
            .layout
            .and_then(|handle| self.layouts.get(handle.0))
            .ok_or_else(|| missing("vertex layout"))?;
        let vertex_shader = self.bound.vertex_shader.ok_or_else(|| missing("vertex shader"))?;
        let fragment_shader = self
            .bound
            .fragment_shader
            .ok_or_else(|| missing("fragment shader"))?;
        let vertex_buffer = self.bound.vertex_buffer.ok_or_else(|| missing("vertex buffer"))?;
        let contents = self
            .buffers
            .get(vertex_buffer.0)
            .ok_or_else(|| missing("live vertex buffer"))?;

        let stride = layout.array_stride as usize;
        let start = first_vertex as usize * stride;
        let end = start + vertex_count as usize * stride;
        if end > contents.len() {
            return Err(TextError::Device(format!(
                "draw reads bytes {start}..{end} of a {} byte buffer",
                contents.len()
            )));
        }

        self.draws.push(DrawCall {
            vertex_count,
            first_vertex,
            vertex_buffer,
            vertex_shader,
            fragment_shader,
            topology: self.bound.topology,
            blend: self.bound.blend,
            texture_view: self.bound.views.get(&ATLAS_SLOT).copied(),
            sampler: self.bound.samplers.get(&ATLAS_SLOT).copied(),
            bytes: contents[start..end].to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wgpu::{vertex_attr_array, VertexStepMode};

    use super::*;

    #[test]
    fn draw_needs_everything_bound() {
        let mut context = RecordingContext::new();
        assert!(matches!(context.draw(3, 0), Err(TextError::Device(_))));

        let layout = context
            .create_vertex_layout(VertexLayout::of::<[f32; 2]>(
                VertexStepMode::Vertex,
                &vertex_attr_array![0 => Float32x2],
            ))
            .unwrap();
        let vs = context
            .create_shader(ShaderStage::Vertex, "fn vs() {}", "vs")
            .unwrap();
        let fs = context
            .create_shader(ShaderStage::Fragment, "fn fs() {}", "fs")
            .unwrap();
        let buffer = context.create_vertex_buffer(24).unwrap();
        context.set_vertex_layout(Some(layout));
        context.set_vertex_shader(Some(vs));
        context.set_fragment_shader(Some(fs));
        context.set_vertex_buffer(Some(buffer));

        let data: [[f32; 2]; 3] = [[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]];
        context
            .write_buffer(buffer, bytemuck::cast_slice(&data))
            .unwrap();
        context.draw(3, 0).unwrap();
        assert_eq!(context.draws[0].vertices::<[f32; 2]>(), data.to_vec());

        // reading past the end of the buffer is refused
        assert!(context.draw(2, 2).is_err());
    }

    #[test]
    fn writes_are_bounded_and_discard_old_contents() {
        let mut context = RecordingContext::new();
        let buffer = context.create_vertex_buffer(8).unwrap();
        context.write_buffer(buffer, &[1; 8]).unwrap();
        context.write_buffer(buffer, &[2; 4]).unwrap();
        assert_eq!(context.buffers.get(buffer.0).unwrap(), &vec![2, 2, 2, 2, 0, 0, 0, 0]);

        assert!(matches!(
            context.write_buffer(buffer, &[0; 12]),
            Err(TextError::BufferWrite(_))
        ));

        context.fail_next_write = true;
        assert!(context.write_buffer(buffer, &[0; 4]).is_err());
        assert!(context.write_buffer(buffer, &[0; 4]).is_ok());
    }

    #[test]
    fn release_is_tolerant_of_stale_handles() {
        let mut context = RecordingContext::new();
        let buffer = context.create_vertex_buffer(4).unwrap();
        context.release_buffer(buffer);
        context.release_buffer(buffer);
        assert_eq!(context.buffers_released, 1);
        assert_eq!(context.live_objects(), 0);
    }

    #[test]
    fn oversized_textures_are_refused() {
        let mut context = RecordingContext::new();
        assert!(matches!(
            context.create_texture(None, u32::MAX, u32::MAX, &[]),
            Err(TextError::Device(_))
        ));
        assert!(matches!(
            context.create_texture(None, 65536, 16384, &[0; 16]),
            Err(TextError::Device(_))
        ));
        assert_eq!(context.live_objects(), 0);
    }
}
