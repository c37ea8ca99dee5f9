//! Debug text overlay drawn as textured quads from a fixed-width bitmap font strip.
//!
//! Everything goes through a [`context::RenderContext`], so the drawer can run on a real wgpu
//! device or headless against [`context::recording::RecordingContext`].

pub mod atlas;
pub mod config;
pub mod context;
pub mod drawer;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod state;
pub mod vertex_buffer;

pub use atlas::{AtlasImage, GlyphCells};
pub use config::{FlushMode, FontDescriptor, TextConfig};
pub use drawer::TextDrawer;
pub use error::{Result, TextError};
pub use layout::{FrameSize, GlyphLayout, Rect, TextVertex};
pub use state::{PipelineStateSnapshot, RasterizerState};
pub use vertex_buffer::DynamicVertexBuffer;
