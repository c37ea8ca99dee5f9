//! The immediate-mode graphics context the text drawer talks to.
//!
//! A [RenderContext] owns GPU objects behind generational handles and keeps a small amount of
//! bound state the way an immediate device context does: shaders, the vertex buffer, sampler and
//! texture slots, blend, depth and raster state. [gpu::WgpuContext] runs it on wgpu, [recording::RecordingContext]
//! keeps everything on the CPU so the drawing logic can be checked without an adapter.

pub mod gpu;
pub mod recording;

use generational_arena::Index;
use wgpu::{
    BlendState, DepthStencilState, PrimitiveTopology, SamplerDescriptor, VertexAttribute,
    VertexBufferLayout, VertexStepMode,
};

use crate::{
    error::{Result, TextError},
    state::RasterizerState,
};

/// Texture and sampler slot every draw samples from. Bindings in other slots are kept as state
/// but never reach a shader.
pub const ATLAS_SLOT: u32 = 0;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct ShaderHandle(pub Index);

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct LayoutHandle(pub Index);

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct TextureHandle(pub Index);

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct ViewHandle(pub Index);

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct SamplerHandle(pub Index);

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct BufferHandle(pub Index);

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Byte length of tightly packed RGBA8 pixels, `None` when it doesn't fit in `usize`.
pub fn rgba8_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(4)
}

/// Describes how one vertex buffer is read by the vertex stage.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexLayout {
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn of<T>(step_mode: VertexStepMode, attributes: &[VertexAttribute]) -> Self {
        Self {
            array_stride: std::mem::size_of::<T>() as u64,
            step_mode,
            attributes: attributes.into(),
        }
    }

    pub fn buffer_layout(&self) -> VertexBufferLayout<'_> {
        VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: self.attributes.as_slice(),
        }
    }

    /// Every attribute has to fit inside one element of the buffer.
    pub fn validate(&self) -> Result<()> {
        if self.array_stride == 0 {
            return Err(TextError::Device("vertex layout has a zero stride".into()));
        }
        for attribute in &self.attributes {
            let end = attribute.offset + attribute.format.size();
            if end > self.array_stride {
                return Err(TextError::Device(format!(
                    "attribute at location {} ends at byte {} but the stride is {}",
                    attribute.shader_location, end, self.array_stride
                )));
            }
        }
        Ok(())
    }
}

pub trait RenderContext {
    fn create_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
        entry_point: &str,
    ) -> Result<ShaderHandle>;

    fn create_vertex_layout(&mut self, layout: VertexLayout) -> Result<LayoutHandle>;

    /// Creates an RGBA8 texture and fills it with `data` (tightly packed rows).
    fn create_texture(
        &mut self,
        label: Option<&str>,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<TextureHandle>;

    fn create_texture_view(&mut self, texture: TextureHandle) -> Result<ViewHandle>;

    fn create_sampler(&mut self, descriptor: &SamplerDescriptor<'_>) -> Result<SamplerHandle>;

    /// A host-writable vertex buffer of exactly `size` bytes.
    fn create_vertex_buffer(&mut self, size: u64) -> Result<BufferHandle>;

    // Releasing a handle the context no longer knows about does nothing.
    fn release_shader(&mut self, handle: ShaderHandle);
    fn release_vertex_layout(&mut self, handle: LayoutHandle);
    fn release_texture(&mut self, handle: TextureHandle);
    fn release_texture_view(&mut self, handle: ViewHandle);
    fn release_sampler(&mut self, handle: SamplerHandle);
    fn release_buffer(&mut self, handle: BufferHandle);

    fn depth_stencil_state(&self) -> Option<DepthStencilState>;
    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilState>);
    fn rasterizer_state(&self) -> RasterizerState;
    fn set_rasterizer_state(&mut self, state: RasterizerState);
    /// The blend applied to every colour target the context draws into.
    fn blend_state(&self) -> Option<BlendState>;
    fn set_blend_state(&mut self, state: Option<BlendState>);
    fn sampler(&self, slot: u32) -> Option<SamplerHandle>;
    fn set_sampler(&mut self, slot: u32, sampler: Option<SamplerHandle>);

    fn set_vertex_layout(&mut self, layout: Option<LayoutHandle>);
    fn set_topology(&mut self, topology: PrimitiveTopology);
    fn set_vertex_buffer(&mut self, buffer: Option<BufferHandle>);
    fn set_vertex_shader(&mut self, shader: Option<ShaderHandle>);
    fn set_fragment_shader(&mut self, shader: Option<ShaderHandle>);
    fn set_texture_view(&mut self, slot: u32, view: Option<ViewHandle>);

    /// Replaces the buffer contents with `data`. Whatever was there before is discarded.
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<()>;

    /// Non-indexed draw of `vertex_count` vertices from the bound vertex buffer.
    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use wgpu::vertex_attr_array;

    use super::*;

    #[test]
    fn layout_rejects_attributes_past_the_stride() {
        let layout = VertexLayout {
            array_stride: 12,
            step_mode: VertexStepMode::Vertex,
            attributes: vertex_attr_array![0 => Float32x3, 1 => Float32x2].to_vec(),
        };
        assert!(matches!(layout.validate(), Err(TextError::Device(_))));

        let layout = VertexLayout::of::<[f32; 5]>(
            VertexStepMode::Vertex,
            &vertex_attr_array![0 => Float32x3, 1 => Float32x2],
        );
        assert!(layout.validate().is_ok());
        assert_eq!(layout.buffer_layout().array_stride, 20);
    }

    #[test]
    fn rgba8_len_reports_overflow() {
        assert_eq!(rgba8_len(190, 4), Some(190 * 4 * 4));
        assert_eq!(rgba8_len(0, 4), Some(0));
        assert_eq!(rgba8_len(u32::MAX, u32::MAX), None);
    }
}
