use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Largest image edge the reducer can handle: phase 2 folds at most one
/// workgroup (256 lanes) of phase-1 winners, each covering 256 entries.
pub const MAX_SUPPORTED_IMAGE_SIZE: u32 = 256 * 256;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Initial window width in physical pixels.
    pub window_width: u32,
    /// Initial window height in physical pixels.
    pub window_height: u32,
    /// Edge length of the square backing storage for every image and map.
    pub max_image_size: u32,
    /// Present with vsync at startup.
    pub vsync: bool,
    /// Overlay the most recently removed seam at startup.
    pub show_seam: bool,
    /// Multiplier applied to energy values in the energy debug view.
    pub energy_display_scale: f32,
    /// JPEG quality used when exporting to `.jpg`/`.jpeg`.
    pub jpeg_quality: u8,
    /// Measure per-tick GPU time with timestamp queries when supported.
    pub gpu_timing: bool,
    /// Pixels added/removed from the target per arrow key press.
    pub target_step: u32,
    /// Number of per-tick GPU timings retained; defaults to twice the max image size.
    pub timing_history: Option<usize>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            window_width: 800,
            window_height: 600,
            max_image_size: 4096,
            vsync: true,
            show_seam: false,
            energy_display_scale: 0.2,
            jpeg_quality: 90,
            gpu_timing: true,
            target_step: 1,
            timing_history: None,
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.window_width > 0 && self.window_height > 0,
            "window-width and window-height must be greater than zero"
        );
        ensure!(
            (1..=MAX_SUPPORTED_IMAGE_SIZE).contains(&self.max_image_size),
            "max-image-size must be between 1 and {MAX_SUPPORTED_IMAGE_SIZE}"
        );
        ensure!(
            self.energy_display_scale.is_finite() && self.energy_display_scale > 0.0,
            "energy-display-scale must be a positive number"
        );
        ensure!(
            (1..=100).contains(&self.jpeg_quality),
            "jpeg-quality must be between 1 and 100"
        );
        ensure!(self.target_step > 0, "target-step must be greater than zero");
        if let Some(history) = self.timing_history {
            ensure!(history > 0, "timing-history must be greater than zero");
        }
        Ok(self)
    }

    pub fn timing_history_capacity(&self) -> usize {
        self.timing_history
            .unwrap_or(self.max_image_size as usize * 2)
    }
}
