//! Analyzer configuration
//!
//! Recognized options, validation, and JSON persistence in the platform
//! config directory. Fields use `#[serde(default)]` so that adding new
//! options won't break existing config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::WindowKind;
use crate::audio::Pacing;

/// Returns the path to the config file: `~/.config/spectra-rs/config.json`
fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("spectra-rs");
    path.push("config.json");
    path
}

/// How multi-channel input collapses to the single channel the analysis
/// runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Average all channels.
    #[default]
    Mixdown,
    /// Analyze one channel by index.
    Index(usize),
}

/// Rejected configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,

    #[error("frame size must be a power of two, got {0}")]
    FrameSizeNotPowerOfTwo(usize),

    #[error("hop size {hop} out of range 1..={frame}")]
    HopOutOfRange { hop: usize, frame: usize },

    #[error("buffer capacity must be a power of two of at least 2 frames, got {0}")]
    BadBufferCapacity(usize),
}

/// Analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Requested sample rate in Hz. Live devices that cannot honor it
    /// fall back to their own rate; file sources use the file's rate.
    pub sample_rate: u32,

    /// Samples per analysis frame (FFT size). Power of two.
    pub frame_size: usize,

    /// Samples advanced between consecutive frames. At most `frame_size`;
    /// smaller values overlap frames by `frame_size - hop_size`.
    pub hop_size: usize,

    /// Analysis window applied before the transform.
    pub window: WindowKind,

    /// Ring capacity in frames. Power of two, at least 2.
    pub buffer_frames: usize,

    /// Channel handling for multi-channel sources.
    pub channels: ChannelMode,

    /// Decode pacing for file sources.
    pub pacing: Pacing,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_size: 1024,
            hop_size: 512,
            window: WindowKind::Hann,
            buffer_frames: 32,
            channels: ChannelMode::Mixdown,
            pacing: Pacing::Realtime,
        }
    }
}

impl AnalyzerConfig {
    /// Check option combinations before the pipeline commits resources.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if !self.frame_size.is_power_of_two() {
            return Err(ConfigError::FrameSizeNotPowerOfTwo(self.frame_size));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(ConfigError::HopOutOfRange {
                hop: self.hop_size,
                frame: self.frame_size,
            });
        }
        if self.buffer_frames < 2 || !self.buffer_frames.is_power_of_two() {
            return Err(ConfigError::BadBufferCapacity(self.buffer_frames));
        }
        Ok(())
    }

    /// Ring capacity in samples.
    pub fn ring_capacity(&self) -> usize {
        self.frame_size * self.buffer_frames
    }

    /// Load the config from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No config file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save the config to disk as pretty JSON.
    pub fn save(&self) {
        let path = config_path();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    log::warn!("Failed to write config: {}", e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize config: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AnalyzerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two_frame() {
        let config = AnalyzerConfig {
            frame_size: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FrameSizeNotPowerOfTwo(1000))
        ));
    }

    #[test]
    fn test_rejects_zero_and_oversized_hop() {
        let zero_hop = AnalyzerConfig {
            hop_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_hop.validate(),
            Err(ConfigError::HopOutOfRange { .. })
        ));

        let oversized = AnalyzerConfig {
            hop_size: 2048,
            ..Default::default()
        };
        assert!(matches!(
            oversized.validate(),
            Err(ConfigError::HopOutOfRange { .. })
        ));
    }

    #[test]
    fn test_rejects_undersized_buffer() {
        let config = AnalyzerConfig {
            buffer_frames: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadBufferCapacity(1))
        ));
    }

    #[test]
    fn test_ring_capacity_is_power_of_two() {
        let config = AnalyzerConfig::default();
        assert!(config.ring_capacity().is_power_of_two());
        assert_eq!(config.ring_capacity(), 1024 * 32);
    }
}
