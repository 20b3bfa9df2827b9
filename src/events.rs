use std::path::PathBuf;
use std::time::Duration;

/// Requests produced by the window layer and consumed once per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarveCommand {
    /// Decode and load a new image.
    Load(PathBuf),
    /// Export the current image.
    Save(PathBuf),
    /// Move the target size by a signed number of pixels per axis.
    AdjustTarget { width: i64, height: i64 },
    /// Start carving towards the target.
    Carve,
    /// Restore the original image.
    Reset,
    ToggleSeam,
    CycleView,
    ToggleVsync,
    Quit,
}

/// What the display pass samples besides the image itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugView {
    #[default]
    Image,
    Energy,
}

impl DebugView {
    pub fn next(self) -> Self {
        match self {
            Self::Image => Self::Energy,
            Self::Energy => Self::Image,
        }
    }

    pub(crate) fn as_u32(self) -> u32 {
        match self {
            Self::Image => 0,
            Self::Energy => 1,
        }
    }
}

/// Plain per-tick signals from the window layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickInput {
    /// Wall-clock time since the previous tick.
    pub elapsed: Duration,
}
