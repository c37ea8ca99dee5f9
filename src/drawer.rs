use std::fmt;

use dbgtext_asset::loader::Loader;
use nalgebra::Point2;
use wgpu::PrimitiveTopology;

use crate::{
    atlas::AtlasImage,
    config::{FlushMode, TextConfig},
    context::{
        LayoutHandle, RenderContext, SamplerHandle, ShaderHandle, ShaderStage, TextureHandle,
        ViewHandle, ATLAS_SLOT,
    },
    error::{Result, TextError},
    layout::{FrameSize, GlyphLayout, Rect, TextVertex},
    pipeline::{atlas_sampler, BUILTIN_SHADER, FRAGMENT_ENTRY, TEXT_BLEND, VERTEX_ENTRY},
    state::PipelineStateSnapshot,
    vertex_buffer::DynamicVertexBuffer,
};

#[derive(Debug)]
struct Resources {
    vertex_shader: ShaderHandle,
    fragment_shader: ShaderHandle,
    layout: LayoutHandle,
    texture: TextureHandle,
    view: ViewHandle,
    sampler: SamplerHandle,
}

impl Resources {
    fn release<C: RenderContext>(self, context: &mut C) {
        context.release_texture_view(self.view);
        context.release_texture(self.texture);
        context.release_shader(self.vertex_shader);
        context.release_shader(self.fragment_shader);
        context.release_sampler(self.sampler);
        context.release_vertex_layout(self.layout);
    }
}

// Tracks what a half-finished load created so a failure can hand it all back.
#[derive(Debug, Default)]
struct PartialResources {
    vertex_shader: Option<ShaderHandle>,
    fragment_shader: Option<ShaderHandle>,
    layout: Option<LayoutHandle>,
    texture: Option<TextureHandle>,
    view: Option<ViewHandle>,
    sampler: Option<SamplerHandle>,
}

impl PartialResources {
    fn release<C: RenderContext>(self, context: &mut C) {
        if let Some(view) = self.view {
            context.release_texture_view(view);
        }
        if let Some(texture) = self.texture {
            context.release_texture(texture);
        }
        for shader in [self.vertex_shader, self.fragment_shader].into_iter().flatten() {
            context.release_shader(shader);
        }
        if let Some(sampler) = self.sampler {
            context.release_sampler(sampler);
        }
        if let Some(layout) = self.layout {
            context.release_vertex_layout(layout);
        }
    }
}

fn create_resources<C: RenderContext>(
    context: &mut C,
    partial: &mut PartialResources,
    shader_source: &str,
    atlas: &AtlasImage,
    config: &TextConfig,
) -> Result<Resources> {
    let vertex_shader = *partial.vertex_shader.insert(context.create_shader(
        ShaderStage::Vertex,
        shader_source,
        VERTEX_ENTRY,
    )?);
    let fragment_shader = *partial.fragment_shader.insert(context.create_shader(
        ShaderStage::Fragment,
        shader_source,
        FRAGMENT_ENTRY,
    )?);
    let layout = *partial
        .layout
        .insert(context.create_vertex_layout(TextVertex::layout())?);
    let texture = *partial.texture.insert(context.create_texture(
        Some("text atlas"),
        atlas.width,
        atlas.height,
        &atlas.data,
    )?);
    let view = *partial.view.insert(context.create_texture_view(texture)?);
    let sampler = *partial
        .sampler
        .insert(context.create_sampler(&atlas_sampler(config.max_anisotropy))?);

    Ok(Resources {
        vertex_shader,
        fragment_shader,
        layout,
        texture,
        view,
        sampler,
    })
}

#[derive(Debug)]
struct Frame {
    layout: GlyphLayout,
    snapshot: PipelineStateSnapshot,
}

/// Draws debug text with a bitmap font atlas.
///
/// A frame of text is bracketed by [TextDrawer::begin] and [TextDrawer::end]. `begin` saves the
/// depth-stencil, rasterizer, blend and sampler state of the context and binds the text
/// pipeline; `end` puts the saved state back. Draw calls outside the bracket fail with
/// [TextError::NotBegun].
///
/// ```no_run
/// # use dbgtext::{context::recording::RecordingContext, TextConfig, TextDrawer};
/// # fn main() -> dbgtext::Result<()> {
/// let mut text = TextDrawer::new(RecordingContext::new(), TextConfig::default());
/// text.load()?;
/// text.begin(800, 600)?;
/// text.draw_text_line("fps: 60")?;
/// text.draw_formatted_text_line(format_args!("frame {}", 42))?;
/// text.end()?;
/// # Ok(())
/// # }
/// ```
pub struct TextDrawer<C: RenderContext> {
    context: C,
    config: TextConfig,
    loader: Loader,
    resources: Option<Resources>,
    vertex_buffer: DynamicVertexBuffer,
    vertices: Vec<TextVertex>,
    frame: Option<Frame>,
    pub foreground_color: [f32; 4],
    /// Top-left corner of the next line drawn by the `draw_text_line` family, in pixels.
    pub insertion_pos: Point2<f32>,
    pub line_height: f32,
}

impl<C: RenderContext> TextDrawer<C> {
    pub fn new(context: C, config: TextConfig) -> Self {
        Self {
            context,
            line_height: config.line_height,
            config,
            loader: Loader::new(),
            resources: None,
            vertex_buffer: DynamicVertexBuffer::new(),
            vertices: Vec::new(),
            frame: None,
            foreground_color: [1.0, 1.0, 1.0, 1.0],
            insertion_pos: Point2::origin(),
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn config(&self) -> &TextConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.resources.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.frame.is_some()
    }

    pub fn buffer_capacity(&self) -> u64 {
        self.vertex_buffer.capacity()
    }

    pub fn buffer_allocations(&self) -> usize {
        self.vertex_buffer.allocations()
    }

    /// Compiles the shaders, uploads the atlas and creates the sampler.
    ///
    /// Nothing stays allocated if any step fails. Loading again first releases the previous set
    /// and rereads the assets from disk. Refused with [TextError::AlreadyBegun] inside a frame,
    /// since the frame's bindings point at the current set.
    pub fn load(&mut self) -> Result<()> {
        if self.frame.is_some() {
            return Err(TextError::AlreadyBegun);
        }
        self.config.validate()?;
        if self.is_loaded() {
            self.unload();
        }

        // only the decoded forms are kept, so the loader drops each file once it's read
        let shader_source = match &self.config.shader_path {
            Some(path) => {
                let source = self
                    .loader
                    .load(path)
                    .and_then(|asset| Ok(asset.as_str()?.to_string()))
                    .map_err(|source| TextError::Asset {
                        path: path.clone(),
                        source,
                    });
                self.loader.evict(path);
                source?
            }
            None => BUILTIN_SHADER.to_string(),
        };

        let atlas_path = &self.config.atlas_path;
        let atlas = self
            .loader
            .load(atlas_path)
            .map_err(|source| TextError::Asset {
                path: atlas_path.clone(),
                source,
            })
            .and_then(|asset| AtlasImage::decode(&asset.bytes, &self.config.cells));
        self.loader.evict(atlas_path);
        let atlas = atlas?;

        let mut partial = PartialResources::default();
        match create_resources(
            &mut self.context,
            &mut partial,
            &shader_source,
            &atlas,
            &self.config,
        ) {
            Ok(resources) => {
                log::info!(
                    "text drawer loaded {:?} ({}x{}, {} cells)",
                    atlas_path,
                    atlas.width,
                    atlas.height,
                    self.config.cells.cell_count
                );
                self.resources = Some(resources);
                Ok(())
            }
            Err(err) => {
                partial.release(&mut self.context);
                Err(err)
            }
        }
    }

    /// Releases every GPU object the drawer owns. Does nothing when already unloaded.
    pub fn unload(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };
        resources.release(&mut self.context);
        self.vertex_buffer.release(&mut self.context);
        self.vertices.clear();
        log::info!("text drawer unloaded");
    }

    pub fn begin(&mut self, width: u32, height: u32) -> Result<()> {
        let resources = self.resources.as_ref().ok_or(TextError::NotLoaded)?;
        if self.frame.is_some() {
            return Err(TextError::AlreadyBegun);
        }
        if width == 0 || height == 0 {
            return Err(TextError::InvalidFrameSize { width, height });
        }

        let snapshot = PipelineStateSnapshot::capture(&self.context, ATLAS_SLOT);

        let context = &mut self.context;
        context.set_vertex_layout(Some(resources.layout));
        context.set_topology(PrimitiveTopology::TriangleList);
        context.set_vertex_buffer(self.vertex_buffer.handle());
        context.set_vertex_shader(Some(resources.vertex_shader));
        context.set_fragment_shader(Some(resources.fragment_shader));
        context.set_sampler(ATLAS_SLOT, Some(resources.sampler));
        context.set_texture_view(ATLAS_SLOT, Some(resources.view));
        context.set_blend_state(Some(TEXT_BLEND));

        self.insertion_pos = Point2::origin();
        self.vertices.clear();
        self.frame = Some(Frame {
            layout: GlyphLayout {
                frame: FrameSize { width, height },
                glyph_width_px: self.config.glyph_width_px,
                glyph_height_px: self.config.glyph_height_px,
                cells: self.config.cells,
                depth: self.config.depth,
            },
            snapshot,
        });
        Ok(())
    }

    /// Flushes anything still pending and restores the state saved by `begin`.
    ///
    /// The saved state is restored even when the final flush fails.
    pub fn end(&mut self) -> Result<()> {
        let frame = self.frame.take().ok_or(TextError::NotBegun)?;
        let flushed = self.flush_pending();
        frame.snapshot.restore(&mut self.context);
        flushed
    }

    /// Sends pending vertices to the GPU now. Only does work in [FlushMode::Deferred].
    pub fn flush(&mut self) -> Result<()> {
        if self.frame.is_none() {
            return Err(TextError::NotBegun);
        }
        self.flush_pending()
    }

    /// Lays out `text` inside `rect` and draws it.
    ///
    /// With `center` the run is centered in `rect` as if it were a single line.
    pub fn draw_text(
        &mut self,
        text: &str,
        rect: Rect,
        color: [f32; 4],
        center: bool,
    ) -> Result<()> {
        let frame = self.frame.as_ref().ok_or(TextError::NotBegun)?;
        if self.resources.is_none() {
            return Err(TextError::NotLoaded);
        }
        frame
            .layout
            .layout(text, rect, color, center, &mut self.vertices);

        match self.config.flush_mode {
            FlushMode::Immediate => self.flush_pending(),
            FlushMode::Deferred => Ok(()),
        }
    }

    /// Draws `text` at the insertion position in the foreground color, then moves the insertion
    /// position down by `line_height`.
    ///
    /// The position moves by one line whatever the text contains, newlines included. It still
    /// moves when the upload fails, so later lines keep their place.
    pub fn draw_text_line(&mut self, text: &str) -> Result<()> {
        let rect = Rect::at(self.insertion_pos.x, self.insertion_pos.y);
        self.draw_line(text, rect)
    }

    /// Like [TextDrawer::draw_text_line], but anchored at `rect` instead of the insertion position.
    pub fn draw_text_line_in(&mut self, rect: Rect, text: &str) -> Result<()> {
        self.draw_line(text, rect)
    }

    pub fn draw_formatted_text_line(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        self.draw_text_line(&fmt::format(args))
    }

    pub fn draw_formatted_text_line_in(
        &mut self,
        rect: Rect,
        args: fmt::Arguments<'_>,
    ) -> Result<()> {
        self.draw_text_line_in(rect, &fmt::format(args))
    }

    fn draw_line(&mut self, text: &str, rect: Rect) -> Result<()> {
        let result = self.draw_text(text, rect, self.foreground_color, false);
        if !matches!(result, Err(TextError::NotBegun | TextError::NotLoaded)) {
            self.insertion_pos.y += self.line_height;
        }
        result
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.vertices.is_empty() {
            return Ok(());
        }
        let vertex_count = self.vertices.len() as u32;
        let result = self
            .vertex_buffer
            .upload(&mut self.context, bytemuck::cast_slice(&self.vertices))
            .and_then(|_| self.context.draw(vertex_count, 0));
        self.vertices.clear();

        if let Err(err) = &result {
            log::warn!("dropped {vertex_count} text vertices: {err}");
        }
        result
    }
}

impl<C: RenderContext> Drop for TextDrawer<C> {
    fn drop(&mut self) {
        self.unload();
    }
}
