use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TextError>;

#[derive(Debug, Error)]
pub enum TextError {
    #[error("couldn't load asset {path:?}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("shader compilation failed: {0}")]
    Shader(String),

    #[error("invalid glyph atlas: {0}")]
    Atlas(String),

    #[error("device error: {0}")]
    Device(String),

    /// Uploading vertices failed. The frame stays active; later draws may succeed.
    #[error("vertex upload failed: {0}")]
    BufferWrite(String),

    #[error("text drawer resources are not loaded")]
    NotLoaded,

    #[error("draw called outside of a begin/end bracket")]
    NotBegun,

    #[error("begin called while a frame is already active")]
    AlreadyBegun,

    #[error("frame size {width}x{height} has a zero dimension")]
    InvalidFrameSize { width: u32, height: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),
}
