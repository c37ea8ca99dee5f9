use std::path::Path;

use crate::{
    context::rgba8_len,
    error::{Result, TextError},
};

/// How characters map onto a single-row atlas of equal-width cells.
///
/// Character `first_char + i` lives in cell `i`. Anything outside
/// `first_char..first_char + cell_count` has no cell and is not drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphCells {
    pub cell_count: u32,
    pub first_char: u32,
}

impl Default for GlyphCells {
    /// Printable ASCII, `' '` through `'~'`.
    fn default() -> Self {
        Self {
            cell_count: 95,
            first_char: 32,
        }
    }
}

impl GlyphCells {
    pub fn cell_width_uv(&self) -> f32 {
        1.0 / self.cell_count as f32
    }

    pub fn cell_index(&self, character: char) -> Option<u32> {
        let offset = (character as u32).checked_sub(self.first_char)?;
        (offset < self.cell_count).then_some(offset)
    }

    /// Horizontal texture coordinates `(left, right)` of the cell holding `character`.
    pub fn uv_range(&self, character: char) -> Option<(f32, f32)> {
        let width = self.cell_width_uv();
        self.cell_index(character).map(|index| {
            let left = index as f32 * width;
            (left, left + width)
        })
    }
}

/// Decoded atlas pixels, RGBA8, ready to be uploaded as a texture.
#[derive(Debug, Clone)]
pub struct AtlasImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl AtlasImage {
    pub fn decode(bytes: &[u8], cells: &GlyphCells) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|err| TextError::Atlas(err.to_string()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Self::from_rgba(image.into_raw(), width, height, cells)
    }

    pub fn from_path<P: AsRef<Path>>(path: P, cells: &GlyphCells) -> Result<Self> {
        let image = image::open(path.as_ref())
            .map_err(|err| TextError::Atlas(format!("{:?}: {err}", path.as_ref())))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Self::from_rgba(image.into_raw(), width, height, cells)
    }

    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32, cells: &GlyphCells) -> Result<Self> {
        if rgba8_len(width, height) != Some(data.len()) {
            return Err(TextError::Atlas(format!(
                "{} bytes of pixel data for a {width}x{height} image",
                data.len()
            )));
        }
        if height == 0 || cells.cell_count == 0 || width < cells.cell_count {
            return Err(TextError::Atlas(format!(
                "a {width}x{height} image can't hold {} cells",
                cells.cell_count
            )));
        }
        if width % cells.cell_count != 0 {
            return Err(TextError::Atlas(format!(
                "width {width} doesn't split into {} equal cells",
                cells.cell_count
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn cell_width_px(&self, cells: &GlyphCells) -> u32 {
        self.width / cells.cell_count
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use approx::assert_relative_eq;
    use image::{ImageOutputFormat, Rgba, RgbaImage};

    use super::*;

    #[test]
    fn every_printable_character_maps_to_its_cell() {
        let cells = GlyphCells::default();
        for code in 32u32..=126 {
            let character = char::from_u32(code).unwrap();
            let (left, right) = cells.uv_range(character).unwrap();
            assert_relative_eq!(left, (code - 32) as f32 / 95.0, epsilon = 1e-6);
            assert_relative_eq!(right, (code - 31) as f32 / 95.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn characters_without_a_cell() {
        let cells = GlyphCells::default();
        for character in ['\n', '\t', '\u{1f}', '\u{7f}', 'é', '字'] {
            assert_eq!(cells.uv_range(character), None, "{character:?}");
        }
    }

    #[test]
    fn decodes_png_and_checks_the_cell_grid() {
        let cells = GlyphCells::default();
        let strip = RgbaImage::from_pixel(95 * 2, 4, Rgba([255, 255, 255, 128]));
        let mut png = Vec::new();
        strip
            .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
            .unwrap();

        let atlas = AtlasImage::decode(&png, &cells).unwrap();
        assert_eq!((atlas.width, atlas.height), (190, 4));
        assert_eq!(atlas.cell_width_px(&cells), 2);
        assert_eq!(&atlas.data[..4], &[255, 255, 255, 128]);

        let uneven = RgbaImage::new(96, 4);
        assert!(matches!(
            AtlasImage::from_rgba(uneven.into_raw(), 96, 4, &cells),
            Err(TextError::Atlas(_))
        ));
        assert!(matches!(
            AtlasImage::decode(b"not an image", &cells),
            Err(TextError::Atlas(_))
        ));
    }

    #[test]
    fn huge_dimensions_are_an_atlas_error() {
        let cells = GlyphCells::default();
        for (width, height) in [(65536, 16384), (u32::MAX, u32::MAX)] {
            assert!(matches!(
                AtlasImage::from_rgba(Vec::new(), width, height, &cells),
                Err(TextError::Atlas(_))
            ));
        }
    }
}
