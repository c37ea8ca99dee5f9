use bytemuck::{Pod, Zeroable};
use nalgebra::{Point2, Vector2};
use wgpu::{vertex_attr_array, VertexStepMode};

use crate::{atlas::GlyphCells, context::VertexLayout};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TextVertex {
    pub pos: [f32; 3],
    pub color: [f32; 4],
    pub uv: [f32; 2],
}

impl TextVertex {
    pub fn layout() -> VertexLayout {
        VertexLayout::of::<TextVertex>(
            VertexStepMode::Vertex,
            &vertex_attr_array![
                // position
                0 => Float32x3,
                // color
                1 => Float32x4,
                // uv
                2 => Float32x2,
            ],
        )
    }
}

/// Screen-space rectangle in pixels, origin top-left.
///
/// A zero width or height means the rectangle only anchors the text at `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn at(x: f32, y: f32) -> Self {
        Self::new(x, y, 0.0, 0.0)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// Pixel position to normalized device coordinates, flipping y so that up is positive.
    pub fn to_ndc(&self, px: f32, py: f32) -> Point2<f32> {
        Point2::new(
            (px / self.width as f32) * 2.0 - 1.0,
            (1.0 - py / self.height as f32) * 2.0 - 1.0,
        )
    }
}

/// Lays out fixed-width glyph quads for one frame size.
#[derive(Debug, Clone, Copy)]
pub struct GlyphLayout {
    pub frame: FrameSize,
    pub glyph_width_px: f32,
    pub glyph_height_px: f32,
    pub cells: GlyphCells,
    pub depth: f32,
}

impl GlyphLayout {
    /// Quad size in NDC units. The pixel size is divided by the frame size without the factor of
    /// two the position mapping uses, so a glyph covers half its nominal pixel size on screen.
    pub fn glyph_size_ndc(&self) -> Vector2<f32> {
        Vector2::new(
            self.glyph_width_px / self.frame.width as f32,
            self.glyph_height_px / self.frame.height as f32,
        )
    }

    /// Appends two triangles per drawable character of `text` to `out` and returns how many
    /// vertices were added.
    ///
    /// `'\n'` returns to the left edge one glyph height lower. Characters without an atlas cell
    /// are skipped and don't advance the cursor. Centering treats the whole string as one line
    /// and counts every character, drawable or not.
    pub fn layout(
        &self,
        text: &str,
        rect: Rect,
        color: [f32; 4],
        center: bool,
        out: &mut Vec<TextVertex>,
    ) -> usize {
        let glyph = self.glyph_size_ndc();
        let mut cursor = self.frame.to_ndc(rect.x, rect.y);

        if center {
            let bottom_right = self.frame.to_ndc(rect.right(), rect.bottom());
            let num_chars = text.chars().count() as f32;
            cursor.x += ((bottom_right.x - cursor.x) - num_chars * glyph.x) * 0.5;
            cursor.y -= ((cursor.y - bottom_right.y) - glyph.y) * 0.5;
        }

        let line_start = cursor.x;
        let start_len = out.len();

        for character in text.chars() {
            if character == '\n' {
                cursor.x = line_start;
                cursor.y -= glyph.y;
                continue;
            }
            let Some((tex_left, tex_right)) = self.cells.uv_range(character) else {
                continue;
            };

            let left = cursor.x;
            let right = left + glyph.x;
            let top = cursor.y;
            let bottom = top - glyph.y;
            let vertex = |x: f32, y: f32, u: f32, v: f32| TextVertex {
                pos: [x, y, self.depth],
                color,
                uv: [u, v],
            };

            out.extend_from_slice(&[
                vertex(left, top, tex_left, 0.0),
                vertex(right, top, tex_right, 0.0),
                vertex(left, bottom, tex_left, 1.0),
                vertex(right, top, tex_right, 0.0),
                vertex(right, bottom, tex_right, 1.0),
                vertex(left, bottom, tex_left, 1.0),
            ]);

            cursor.x += glyph.x;
        }

        out.len() - start_len
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

    fn layout_800x600() -> GlyphLayout {
        GlyphLayout {
            frame: FrameSize {
                width: 800,
                height: 600,
            },
            glyph_width_px: 15.0,
            glyph_height_px: 42.0,
            cells: GlyphCells::default(),
            depth: 0.5,
        }
    }

    fn x_extent(vertices: &[TextVertex]) -> (f32, f32) {
        vertices.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
            (lo.min(v.pos[0]), hi.max(v.pos[0]))
        })
    }

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<TextVertex>(), 36);
        let layout = TextVertex::layout();
        assert_eq!(layout.array_stride, 36);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[2].offset, 28);
    }

    #[test]
    fn ndc_mapping_flips_y() {
        let frame = FrameSize {
            width: 800,
            height: 600,
        };
        assert_eq!(frame.to_ndc(0.0, 0.0), Point2::new(-1.0, 1.0));
        assert_eq!(frame.to_ndc(800.0, 600.0), Point2::new(1.0, -1.0));
        assert_eq!(frame.to_ndc(400.0, 300.0), Point2::new(0.0, 0.0));
    }

    #[test]
    fn six_vertices_per_drawable_character() {
        let mut out = Vec::new();
        let origin = Rect::at(0.0, 0.0);
        let added = layout_800x600().layout("Hello, world!", origin, WHITE, false, &mut out);
        assert_eq!(added, 6 * 13);
        assert_eq!(out.len(), added);
        assert!(out.iter().all(|v| v.color == WHITE && v.pos[2] == 0.5));
    }

    #[test]
    fn quad_covers_the_glyph_cell() {
        let mut out = Vec::new();
        let layout = layout_800x600();
        layout.layout("A", Rect::at(0.0, 0.0), WHITE, false, &mut out);

        let (u_left, u_right) = (33.0 / 95.0, 34.0 / 95.0);
        let expected = [
            ([-1.0, 1.0], [u_left, 0.0]),
            ([-1.0 + 15.0 / 800.0, 1.0], [u_right, 0.0]),
            ([-1.0, 1.0 - 42.0 / 600.0], [u_left, 1.0]),
            ([-1.0 + 15.0 / 800.0, 1.0], [u_right, 0.0]),
            ([-1.0 + 15.0 / 800.0, 1.0 - 42.0 / 600.0], [u_right, 1.0]),
            ([-1.0, 1.0 - 42.0 / 600.0], [u_left, 1.0]),
        ];
        for (vertex, (pos, uv)) in out.iter().zip(expected) {
            assert_relative_eq!(vertex.pos[0], pos[0], epsilon = 1e-6);
            assert_relative_eq!(vertex.pos[1], pos[1], epsilon = 1e-6);
            assert_relative_eq!(vertex.uv[0], uv[0], epsilon = 1e-6);
            assert_relative_eq!(vertex.uv[1], uv[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn undrawable_characters_emit_nothing_and_keep_the_cursor() {
        let layout = layout_800x600();
        let mut plain = Vec::new();
        layout.layout("ab", Rect::at(10.0, 10.0), WHITE, false, &mut plain);

        let mut noisy = Vec::new();
        let anchor = Rect::at(10.0, 10.0);
        let added = layout.layout("\ta\u{7f}é\u{0}b", anchor, WHITE, false, &mut noisy);
        assert_eq!(added, 12);
        assert_eq!(plain, noisy);

        let mut none = Vec::new();
        assert_eq!(layout.layout("\t\r€", Rect::at(0.0, 0.0), WHITE, false, &mut none), 0);
    }

    #[test]
    fn newline_returns_to_the_left_edge_one_glyph_lower() {
        let layout = layout_800x600();
        let mut out = Vec::new();
        layout.layout("ab\nc", Rect::at(80.0, 60.0), WHITE, false, &mut out);
        assert_eq!(out.len(), 18);

        let a_top_left = out[0].pos;
        let c_top_left = out[12].pos;
        assert_relative_eq!(c_top_left[0], a_top_left[0]);
        assert_relative_eq!(c_top_left[1], a_top_left[1] - 42.0 / 600.0, epsilon = 1e-6);
    }

    #[test]
    fn centered_single_line_is_symmetric_about_the_rect() {
        let layout = layout_800x600();
        let rect = Rect::new(100.0, 200.0, 300.0, 50.0);
        let mut out = Vec::new();
        layout.layout("centered", rect, WHITE, true, &mut out);

        let (left, right) = x_extent(&out);
        let mid = layout.frame.to_ndc(rect.x + rect.width / 2.0, 0.0).x;
        assert_relative_eq!(left + right, 2.0 * mid, epsilon = 1e-5);
        assert_relative_eq!(right - left, 8.0 * 15.0 / 800.0, epsilon = 1e-5);

        let top = out.iter().map(|v| v.pos[1]).fold(f32::MIN, f32::max);
        let bottom = out.iter().map(|v| v.pos[1]).fold(f32::MAX, f32::min);
        let mid_y = layout.frame.to_ndc(0.0, rect.y + rect.height / 2.0).y;
        assert_relative_eq!(top + bottom, 2.0 * mid_y, epsilon = 1e-5);
    }

    #[test]
    fn centering_counts_undrawable_characters() {
        // a known limitation: skipped characters still take up room in the centering math
        let layout = layout_800x600();
        let rect = Rect::new(0.0, 0.0, 400.0, 100.0);
        let mut with_tab = Vec::new();
        layout.layout("ab\t", rect, WHITE, true, &mut with_tab);
        let mut without = Vec::new();
        layout.layout("ab", rect, WHITE, true, &mut without);
        assert_relative_eq!(
            without[0].pos[0] - with_tab[0].pos[0],
            0.5 * 15.0 / 800.0,
            epsilon = 1e-6
        );
    }
}
