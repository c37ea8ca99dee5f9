use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use dbgtext::{FontDescriptor, GlyphCells};
use fontdue::{Font, FontSettings, Metrics};
use image::{Rgba, RgbaImage};
use itertools::Itertools;

struct Args {
    font: PathBuf,
    px: f32,
    out: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let usage = "usage: bake-atlas <font.ttf> <px> <out.png>";
    let font = args.next().ok_or(anyhow!(usage))?.into();
    let px = args
        .next()
        .ok_or(anyhow!(usage))?
        .parse()
        .context("px must be a number")?;
    let out = args.next().ok_or(anyhow!(usage))?.into();
    Ok(Args { font, px, out })
}

fn load_font(path: &Path) -> Result<Font> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Font::from_bytes(bytes, FontSettings::default()).map_err(|err| anyhow!(err))
}

/// Rasterizes every cell of `cells` into one row of equal-width cells. Glyphs are white with the
/// coverage in alpha, sitting on a shared baseline.
fn bake(font: &Font, px: f32, cells: &GlyphCells) -> Result<(RgbaImage, u32, u32)> {
    let glyphs = (cells.first_char..cells.first_char + cells.cell_count)
        .map(|code| {
            let character = char::from_u32(code).ok_or(anyhow!("{code} is not a character"))?;
            anyhow::Ok(font.rasterize(character, px))
        })
        .collect::<Result<Vec<(Metrics, Vec<u8>)>>>()?;

    let line = font
        .horizontal_line_metrics(px)
        .ok_or(anyhow!("font has no horizontal line metrics"))?;
    let ascent = line.ascent.ceil() as i32;
    let cell_height = (line.ascent - line.descent).ceil().max(1.0) as u32;
    let cell_width = glyphs
        .iter()
        .map(|(metrics, _)| metrics.advance_width.ceil() as u32)
        .chain(glyphs.iter().map(|(metrics, _)| metrics.width as u32))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut image = RgbaImage::from_pixel(
        cell_width * cells.cell_count,
        cell_height,
        Rgba([255, 255, 255, 0]),
    );

    for (index, (metrics, coverage)) in glyphs.iter().enumerate() {
        let origin_x = index as i32 * cell_width as i32 + metrics.xmin.max(0);
        let origin_y = ascent - (metrics.ymin + metrics.height as i32);
        for (row, column) in (0..metrics.height).cartesian_product(0..metrics.width) {
            let x = origin_x + column as i32;
            let y = origin_y + row as i32;
            // clip to the glyph's own cell
            let cell_right = (index as i32 + 1) * cell_width as i32;
            if x >= cell_right || y < 0 || y >= cell_height as i32 {
                continue;
            }
            let alpha = coverage[row * metrics.width + column];
            image.put_pixel(x as u32, y as u32, Rgba([255, 255, 255, alpha]));
        }
    }

    Ok((image, cell_width, cell_height))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let font = load_font(&args.font)?;
    let cells = GlyphCells::default();
    let (image, cell_width, cell_height) = bake(&font, args.px, &cells)?;
    image
        .save(&args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;
    log::info!(
        "baked {} glyphs into {} ({cell_width}x{cell_height} cells)",
        cells.cell_count,
        args.out.display()
    );

    let atlas = args
        .out
        .file_name()
        .map(PathBuf::from)
        .ok_or(anyhow!("output path has no file name"))?;
    let descriptor = FontDescriptor {
        atlas,
        glyph_width: cell_width as f32,
        glyph_height: cell_height as f32,
        first_char: cells.first_char,
        cell_count: cells.cell_count,
        line_height: Some(cell_height as f32),
        flush_mode: None,
    };
    let descriptor_path = args.out.with_extension("toml");
    std::fs::write(&descriptor_path, descriptor.to_toml()?)
        .with_context(|| format!("writing {}", descriptor_path.display()))?;
    log::info!("wrote descriptor {}", descriptor_path.display());

    Ok(())
}
