//! The fixed pipeline text is drawn with: one WGSL module with a vertex and a fragment entry
//! point, the [TextVertex](crate::layout::TextVertex) layout, alpha blending and a wrapping
//! anisotropic sampler for the atlas.

use wgpu::{
    AddressMode, BlendComponent, BlendFactor, BlendOperation, BlendState, FilterMode,
    SamplerDescriptor,
};

pub const BUILTIN_SHADER: &str = include_str!("../shaders/text.wgsl");
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Straight alpha over the destination colour; the source alpha replaces the destination alpha.
pub const TEXT_BLEND: BlendState = BlendState {
    color: BlendComponent {
        src_factor: BlendFactor::SrcAlpha,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
        operation: BlendOperation::Add,
    },
    alpha: BlendComponent {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
        operation: BlendOperation::Add,
    },
};

pub fn atlas_sampler(max_anisotropy: u16) -> SamplerDescriptor<'static> {
    SamplerDescriptor {
        label: Some("text atlas sampler"),
        address_mode_u: AddressMode::Repeat,
        address_mode_v: AddressMode::Repeat,
        address_mode_w: AddressMode::Repeat,
        // anisotropic filtering needs every filter set to linear
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        mipmap_filter: FilterMode::Linear,
        lod_min_clamp: 0.0,
        lod_max_clamp: f32::MAX,
        compare: None,
        anisotropy_clamp: max_anisotropy,
        border_color: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_shader_has_both_entry_points() {
        assert!(BUILTIN_SHADER.contains(&format!("fn {VERTEX_ENTRY}(")));
        assert!(BUILTIN_SHADER.contains(&format!("fn {FRAGMENT_ENTRY}(")));
    }

    #[test]
    fn sampler_wraps_and_filters_anisotropically() {
        let sampler = atlas_sampler(16);
        assert_eq!(sampler.address_mode_u, AddressMode::Repeat);
        assert_eq!(sampler.address_mode_v, AddressMode::Repeat);
        assert_eq!(sampler.anisotropy_clamp, 16);
        assert_eq!(sampler.compare, None);
    }
}
