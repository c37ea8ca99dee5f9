use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    atlas::GlyphCells,
    error::{Result, TextError},
};

/// When vertices produced by draw calls reach the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Every draw call uploads and draws its own vertices.
    #[default]
    Immediate,
    /// Vertices pile up until `flush` or `end`, then go out in a single draw.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextConfig {
    pub glyph_width_px: f32,
    pub glyph_height_px: f32,
    pub cells: GlyphCells,
    pub line_height: f32,
    pub depth: f32,
    pub atlas_path: PathBuf,
    /// WGSL source on disk. The bundled shader is used when unset.
    pub shader_path: Option<PathBuf>,
    pub max_anisotropy: u16,
    pub flush_mode: FlushMode,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            glyph_width_px: 15.0,
            glyph_height_px: 42.0,
            cells: GlyphCells::default(),
            line_height: 15.0,
            depth: 0.5,
            atlas_path: PathBuf::from("assets/font.png"),
            shader_path: None,
            max_anisotropy: 16,
            flush_mode: FlushMode::Immediate,
        }
    }
}

impl TextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_glyph_size(mut self, width_px: f32, height_px: f32) -> Self {
        self.glyph_width_px = width_px;
        self.glyph_height_px = height_px;
        self
    }

    pub fn with_cells(mut self, cells: GlyphCells) -> Self {
        self.cells = cells;
        self
    }

    pub fn with_line_height(mut self, line_height: f32) -> Self {
        self.line_height = line_height;
        self
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_atlas<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.atlas_path = path.into();
        self
    }

    pub fn with_shader<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.shader_path = Some(path.into());
        self
    }

    pub fn with_max_anisotropy(mut self, max_anisotropy: u16) -> Self {
        self.max_anisotropy = max_anisotropy;
        self
    }

    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.glyph_width_px > 0.0 && self.glyph_height_px > 0.0) {
            return Err(TextError::Config(format!(
                "glyph size {}x{} must be positive",
                self.glyph_width_px, self.glyph_height_px
            )));
        }
        if self.cells.cell_count == 0 {
            return Err(TextError::Config("atlas needs at least one cell".into()));
        }
        if !(1..=16).contains(&self.max_anisotropy) {
            return Err(TextError::Config(format!(
                "max anisotropy {} is outside 1..=16",
                self.max_anisotropy
            )));
        }
        Ok(())
    }

    /// Applies a font descriptor on top of this config. Relative atlas paths are resolved
    /// against `base_dir`.
    pub fn with_descriptor(mut self, descriptor: FontDescriptor, base_dir: &Path) -> Self {
        self.atlas_path = base_dir.join(descriptor.atlas);
        self.glyph_width_px = descriptor.glyph_width;
        self.glyph_height_px = descriptor.glyph_height;
        self.cells = GlyphCells {
            cell_count: descriptor.cell_count,
            first_char: descriptor.first_char,
        };
        if let Some(line_height) = descriptor.line_height {
            self.line_height = line_height;
        }
        if let Some(flush_mode) = descriptor.flush_mode {
            self.flush_mode = flush_mode;
        }
        self
    }

    pub fn from_descriptor_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| TextError::Asset {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        let descriptor = FontDescriptor::from_toml(&source)?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let config = Self::default().with_descriptor(descriptor, base_dir);
        config.validate()?;
        Ok(config)
    }
}

/// The atlas-specific half of the configuration, kept next to the atlas image:
///
/// ```toml
/// atlas = "font.png"
/// glyph_width = 15.0
/// glyph_height = 42.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontDescriptor {
    pub atlas: PathBuf,
    pub glyph_width: f32,
    pub glyph_height: f32,
    #[serde(default = "default_first_char")]
    pub first_char: u32,
    #[serde(default = "default_cell_count")]
    pub cell_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_mode: Option<FlushMode>,
}

fn default_first_char() -> u32 {
    GlyphCells::default().first_char
}

fn default_cell_count() -> u32 {
    GlyphCells::default().cell_count
}

impl FontDescriptor {
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| TextError::Config(err.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| TextError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_atlas() {
        let config = TextConfig::default();
        assert_eq!((config.glyph_width_px, config.glyph_height_px), (15.0, 42.0));
        assert_eq!(config.cells.cell_count, 95);
        assert_eq!(config.cells.first_char, 32);
        assert_eq!(config.line_height, 15.0);
        assert_eq!(config.flush_mode, FlushMode::Immediate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = TextConfig::new()
            .with_glyph_size(8.0, 16.0)
            .with_line_height(18.0)
            .with_atlas("fonts/small.png")
            .with_shader("shaders/custom.wgsl")
            .with_flush_mode(FlushMode::Deferred);
        assert_eq!(config.glyph_width_px, 8.0);
        assert_eq!(config.line_height, 18.0);
        assert_eq!(config.atlas_path, PathBuf::from("fonts/small.png"));
        assert_eq!(config.shader_path, Some(PathBuf::from("shaders/custom.wgsl")));
        assert_eq!(config.flush_mode, FlushMode::Deferred);
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        assert!(TextConfig::new().with_glyph_size(0.0, 10.0).validate().is_err());
        assert!(TextConfig::new().with_glyph_size(f32::NAN, 10.0).validate().is_err());
        assert!(TextConfig::new().with_max_anisotropy(0).validate().is_err());
        assert!(TextConfig::new()
            .with_cells(GlyphCells {
                cell_count: 0,
                first_char: 32
            })
            .validate()
            .is_err());
    }

    #[test]
    fn descriptor_fills_in_atlas_fields() {
        let descriptor = FontDescriptor::from_toml(
            r#"
            atlas = "mono.png"
            glyph_width = 9.0
            glyph_height = 18.0
            line_height = 20.0
            flush_mode = "deferred"
            "#,
        )
        .unwrap();
        assert_eq!(descriptor.cell_count, 95);
        assert_eq!(descriptor.first_char, 32);

        let config = TextConfig::default().with_descriptor(descriptor, Path::new("assets"));
        assert_eq!(config.atlas_path, PathBuf::from("assets/mono.png"));
        assert_eq!((config.glyph_width_px, config.glyph_height_px), (9.0, 18.0));
        assert_eq!(config.line_height, 20.0);
        assert_eq!(config.flush_mode, FlushMode::Deferred);
    }

    #[test]
    fn descriptor_errors_are_config_errors() {
        assert!(matches!(
            FontDescriptor::from_toml("glyph_width = 9.0"),
            Err(TextError::Config(_))
        ));
        assert!(matches!(
            TextConfig::from_descriptor_file("missing/font.toml"),
            Err(TextError::Asset { .. })
        ));
    }
}
