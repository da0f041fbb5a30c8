//! Renderer configuration.

use crate::error::{Error, Result};

/// Upper bound on the number of frame slots.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Default number of frame slots (double buffering).
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Settings shared by the window, the renderer and headless runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub vsync: bool,
    pub frames_in_flight: usize,
    pub validation: bool,
    /// Number of ticks a headless run performs.
    pub headless_frames: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "frameloop".to_string(),
            vsync: true,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            validation: cfg!(debug_assertions),
            headless_frames: 120,
        }
    }
}

impl RendererConfig {
    /// Checks the values the renderer cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero extent or a frame count outside
    /// `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames in flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!((config.width, config.height), (800, 600));
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_too_many_frames_in_flight() {
        let config = RendererConfig {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_single_slot_is_valid() {
        let config = RendererConfig {
            frames_in_flight: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_extent() {
        let config = RendererConfig {
            height: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
