use std::path::PathBuf;

use thiserror::Error;

/// Recoverable failures surfaced to the user; the loaded image and carve
/// state are left untouched when one of these is returned.
#[derive(Debug, Error)]
pub enum CarveError {
    /// Image exceeds the configured backing storage.
    #[error("image too large ({width}x{height}); max supported is {max}x{max}")]
    ImageTooLarge { width: u32, height: u32, max: u32 },

    /// Image has a zero-sized edge.
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Operation requires a loaded image.
    #[error("no image loaded")]
    NoImage,

    /// Decoding the source file failed.
    #[error("failed to load image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Encoding the export failed.
    #[error("failed to save image {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// GPU pipeline failure; not recoverable by the caller.
    #[error("gpu failure: {0:#}")]
    Gpu(anyhow::Error),
}
