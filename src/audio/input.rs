//! Live audio input capture
//!
//! Opens a cpal input stream and forwards converted, channel-resolved
//! samples into the ring. The hardware callback does constant-time work
//! only: sample conversion, channel mixdown, one ring write.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::buffer::SampleProducer;
use super::{SourceState, SourceStateCell};
use crate::config::ChannelMode;

/// Samples of scratch preallocated for the callback; grows only if the
/// driver delivers larger buffers than this.
const CALLBACK_SCRATCH: usize = 1 << 14;

/// Errors opening or starting a capture device. All terminal; surfaced
/// synchronously from [`LiveInput::start`].
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no input device available")]
    NoDevice,

    #[error("input device '{0}' not found")]
    NotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query stream configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("failed to build input stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("failed to start input stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

/// List the names of all available input devices.
pub fn list_input_devices() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    Ok(host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect())
}

/// Live capture source. Dropping it closes the stream.
pub struct LiveInput {
    // Held for its lifetime; the callback stops when the stream drops.
    _stream: cpal::Stream,
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

impl LiveInput {
    /// Open the device and start delivering samples into `producer`.
    ///
    /// `device_name` selects an input device by (case-insensitive)
    /// substring match; `None` takes the default device. The requested
    /// sample rate is honored when the device supports it, otherwise the
    /// device default is used and logged.
    pub fn start(
        device_name: Option<&str>,
        requested_rate: u32,
        channel_mode: ChannelMode,
        mut producer: SampleProducer,
        state: Arc<SourceStateCell>,
    ) -> Result<Self, DeviceError> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(wanted) => {
                let lowered = wanted.to_lowercase();
                host.input_devices()?
                    .find(|d| {
                        d.name()
                            .map(|n| n.to_lowercase().contains(&lowered))
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| DeviceError::NotFound(wanted.to_string()))?
            }
            None => host.default_input_device().ok_or(DeviceError::NoDevice)?,
        };

        let resolved_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using input device: {}", resolved_name);

        let config = Self::pick_config(&device, requested_rate)?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        log::info!(
            "Input config: {} Hz, {} channel(s), {:?}",
            sample_rate,
            channels,
            config.sample_format()
        );

        let ch = channels as usize;
        let mut scratch: Vec<f32> = Vec::with_capacity(CALLBACK_SCRATCH);
        let err_state = Arc::clone(&state);
        let on_error = move |err: cpal::StreamError| {
            log::error!("Input stream error: {}", err);
            err_state.set(SourceState::Failed);
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    for frame in data.chunks(ch) {
                        scratch.push(mix_frame(frame, channel_mode));
                    }
                    producer.write(&scratch);
                },
                on_error,
                None,
            )?,
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    for frame in data.chunks(ch) {
                        let mixed = match channel_mode {
                            ChannelMode::Mixdown => {
                                let sum: f32 =
                                    frame.iter().map(|&s| s as f32 / 32768.0).sum();
                                sum / frame.len() as f32
                            }
                            ChannelMode::Index(i) => {
                                frame.get(i).map(|&s| s as f32 / 32768.0).unwrap_or(0.0)
                            }
                        };
                        scratch.push(mixed);
                    }
                    producer.write(&scratch);
                },
                on_error,
                None,
            )?,
            format => return Err(DeviceError::UnsupportedFormat(format)),
        };

        stream.play()?;
        log::info!("Capture started");

        Ok(Self {
            _stream: stream,
            device_name: resolved_name,
            sample_rate,
            channels,
        })
    }

    /// Prefer a config carrying the requested rate; fall back to the
    /// device default.
    fn pick_config(
        device: &cpal::Device,
        requested_rate: u32,
    ) -> Result<cpal::SupportedStreamConfig, DeviceError> {
        let matching = device.supported_input_configs()?.find(|range| {
            range.min_sample_rate().0 <= requested_rate
                && requested_rate <= range.max_sample_rate().0
        });

        match matching {
            Some(range) => Ok(range.with_sample_rate(cpal::SampleRate(requested_rate))),
            None => {
                let default = device.default_input_config()?;
                log::warn!(
                    "Device does not support {} Hz, using device rate {} Hz",
                    requested_rate,
                    default.sample_rate().0
                );
                Ok(default)
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Actual capture rate, which may differ from the requested rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Resolve one interleaved multi-channel frame to a single sample.
#[inline]
fn mix_frame(frame: &[f32], mode: ChannelMode) -> f32 {
    match mode {
        ChannelMode::Mixdown => frame.iter().sum::<f32>() / frame.len() as f32,
        ChannelMode::Index(i) => frame.get(i).copied().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_frame_mixdown_averages() {
        let frame = [0.5, -0.5, 1.0, 0.0];
        assert!((mix_frame(&frame, ChannelMode::Mixdown) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_mix_frame_index_selects_channel() {
        let frame = [0.1, 0.7];
        assert_eq!(mix_frame(&frame, ChannelMode::Index(1)), 0.7);
    }

    #[test]
    fn test_mix_frame_index_out_of_range_is_silence() {
        let frame = [0.1, 0.7];
        assert_eq!(mix_frame(&frame, ChannelMode::Index(5)), 0.0);
    }
}
