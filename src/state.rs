use wgpu::{DepthStencilState, Face, FrontFace, PolygonMode};

use crate::context::{RenderContext, SamplerHandle};

/// The part of the primitive state that describes rasterization. Topology is bound separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerState {
    pub cull_mode: Option<Face>,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: None,
            front_face: FrontFace::Ccw,
            polygon_mode: PolygonMode::Fill,
        }
    }
}

/// Context state that text drawing overrides. Captured by `begin` and handed back by `end`.
///
/// `restore` consumes the snapshot, so a bracket can only be closed once.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStateSnapshot {
    pub depth_stencil: Option<DepthStencilState>,
    pub rasterizer: RasterizerState,
    pub blend: Option<wgpu::BlendState>,
    pub sampler: Option<SamplerHandle>,
    sampler_slot: u32,
}

impl PipelineStateSnapshot {
    pub fn capture<C: RenderContext + ?Sized>(context: &C, sampler_slot: u32) -> Self {
        Self {
            depth_stencil: context.depth_stencil_state(),
            rasterizer: context.rasterizer_state(),
            blend: context.blend_state(),
            sampler: context.sampler(sampler_slot),
            sampler_slot,
        }
    }

    pub fn restore<C: RenderContext + ?Sized>(self, context: &mut C) {
        context.set_depth_stencil_state(self.depth_stencil);
        context.set_rasterizer_state(self.rasterizer);
        context.set_blend_state(self.blend);
        context.set_sampler(self.sampler_slot, self.sampler);
    }

    pub fn sampler_slot(&self) -> u32 {
        self.sampler_slot
    }
}

#[cfg(test)]
mod tests {
    use wgpu::{BlendState, CompareFunction, TextureFormat};

    use super::*;
    use crate::context::recording::RecordingContext;

    #[test]
    fn restore_puts_back_what_capture_saw() {
        let mut context = RecordingContext::new();
        let host_depth = DepthStencilState {
            format: TextureFormat::Depth32Float,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil: Default::default(),
            bias: Default::default(),
        };
        let host_raster = RasterizerState {
            cull_mode: Some(Face::Back),
            ..Default::default()
        };
        context.set_depth_stencil_state(Some(host_depth.clone()));
        context.set_rasterizer_state(host_raster);
        context.set_blend_state(Some(BlendState::REPLACE));

        let snapshot = PipelineStateSnapshot::capture(&context, 0);

        context.set_depth_stencil_state(None);
        context.set_rasterizer_state(RasterizerState::default());
        context.set_blend_state(Some(BlendState::ALPHA_BLENDING));

        snapshot.restore(&mut context);
        assert_eq!(context.depth_stencil_state(), Some(host_depth));
        assert_eq!(context.rasterizer_state(), host_raster);
        assert_eq!(context.blend_state(), Some(BlendState::REPLACE));
        assert_eq!(context.sampler(0), None);
    }
}
