//! Audio file input
//!
//! Decodes an audio file with symphonia on a dedicated thread and feeds
//! the samples into the ring, either paced to the source sample rate or
//! as fast as the ring accepts. End of file is a terminal state, not an
//! error; downstream stages cannot tell a file source from a live one.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use thiserror::Error;

use super::buffer::SampleProducer;
use super::{SourceState, SourceStateCell};
use crate::config::ChannelMode;

/// Largest slice handed to the ring in one write. Keeps a single decoded
/// packet from exceeding the ring capacity.
const WRITE_CHUNK: usize = 4096;

/// How fast the decode thread pushes samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    /// Hold production to the source sample rate.
    #[default]
    Realtime,
    /// Decode as fast as the ring accepts.
    Fast,
}

/// Errors opening a file for decoding. All terminal; surfaced
/// synchronously from [`FileInput::start`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to probe audio format: {0}")]
    Probe(String),

    #[error("no audio tracks found")]
    NoTracks,

    #[error("failed to create decoder: {0}")]
    Decoder(String),
}

/// Metadata of an opened audio file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u32,
    pub duration: Option<Duration>,
    pub format: String,
}

/// File decode source. The decode thread runs from `start` until EOF,
/// a fault, or `stop`.
pub struct FileInput {
    info: FileInfo,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FileInput {
    /// Open and probe `path`, then start decoding into `producer`.
    pub fn start(
        path: &Path,
        channel_mode: ChannelMode,
        pacing: Pacing,
        producer: SampleProducer,
        state: Arc<SourceStateCell>,
    ) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTracks)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;
        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params.channels.map(|c| c.count() as u32).unwrap_or(1);

        let duration = codec_params.n_frames.map(|n_frames| {
            let time_base = codec_params
                .time_base
                .unwrap_or(TimeBase::new(1, sample_rate));
            let time = time_base.calc_time(n_frames);
            Duration::from_secs_f64(time.seconds as f64 + time.frac)
        });

        let format_name = format!("{:?}", codec_params.codec).replace("CODEC_TYPE_", "");

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Decoder(e.to_string()))?;

        let info = FileInfo {
            path: path.to_path_buf(),
            sample_rate,
            channels,
            duration,
            format: format_name,
        };
        log::info!(
            "Opened {}: {} Hz, {} channel(s), {}",
            info.path.display(),
            info.sample_rate,
            info.channels,
            info.format
        );

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("file-decode".to_string())
            .spawn(move || {
                decode_loop(
                    format,
                    decoder,
                    track_id,
                    sample_rate,
                    channel_mode,
                    pacing,
                    producer,
                    thread_running,
                    state,
                );
            })
            .expect("failed to spawn decode thread");

        Ok(Self {
            info,
            running,
            handle: Some(handle),
        })
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Signal the decode thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(
    mut format: Box<dyn FormatReader>,
    mut decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channel_mode: ChannelMode,
    pacing: Pacing,
    mut producer: SampleProducer,
    running: Arc<AtomicBool>,
    state: Arc<SourceStateCell>,
) {
    let mut mono: Vec<f32> = Vec::with_capacity(WRITE_CHUNK * 2);
    let started = Instant::now();
    let mut produced: u64 = 0;

    'outer: while running.load(Ordering::Acquire) {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                log::info!("Decoder reached end of file");
                state.set(SourceState::Finished);
                break;
            }
            Err(e) => {
                log::error!("Failed to read packet: {}", e);
                state.set(SourceState::Failed);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
        };

        mono.clear();
        convert_frames(&decoded, channel_mode, &mut mono);

        if pacing == Pacing::Realtime {
            let target = Duration::from_secs_f64(produced as f64 / sample_rate as f64);
            let elapsed = started.elapsed();
            if target > elapsed {
                thread::sleep(target - elapsed);
            }
        }

        // File data is finite: back off while the ring is full rather than
        // dropping samples. Free space only grows from the producer's view,
        // so a fitting chunk stays fitting.
        for chunk in mono.chunks(WRITE_CHUNK) {
            while producer.free_space() < chunk.len() {
                if !running.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_millis(1));
            }
            producer.write(chunk);
            produced += chunk.len() as u64;
        }
    }

    log::info!("Decode thread finished ({} samples)", produced);
}

/// Convert one decoded packet to single-channel `f32`, appending to `out`.
fn convert_frames(buffer: &AudioBufferRef<'_>, mode: ChannelMode, out: &mut Vec<f32>) {
    match buffer {
        AudioBufferRef::F32(buf) => {
            let channels = buf.spec().channels.count();
            for frame in 0..buf.frames() {
                out.push(resolve_channels(
                    |c| buf.chan(c)[frame],
                    channels,
                    mode,
                ));
            }
        }
        AudioBufferRef::S16(buf) => {
            let channels = buf.spec().channels.count();
            for frame in 0..buf.frames() {
                out.push(resolve_channels(
                    |c| buf.chan(c)[frame] as f32 / 32768.0,
                    channels,
                    mode,
                ));
            }
        }
        AudioBufferRef::S32(buf) => {
            let channels = buf.spec().channels.count();
            for frame in 0..buf.frames() {
                out.push(resolve_channels(
                    |c| buf.chan(c)[frame] as f32 / 2147483648.0,
                    channels,
                    mode,
                ));
            }
        }
        _ => {
            log::warn!("Unsupported sample buffer layout, skipping packet");
        }
    }
}

/// Resolve one multi-channel frame to a single sample per the configured
/// channel handling.
#[inline]
fn resolve_channels(get: impl Fn(usize) -> f32, channels: usize, mode: ChannelMode) -> f32 {
    match mode {
        ChannelMode::Mixdown => {
            (0..channels).map(&get).sum::<f32>() / channels as f32
        }
        ChannelMode::Index(i) if i < channels => get(i),
        ChannelMode::Index(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sample_ring;

    #[test]
    fn test_start_missing_file_is_io_error() {
        let (prod, _cons, _mon) = sample_ring(1024);
        let state = Arc::new(SourceStateCell::new());

        let result = FileInput::start(
            Path::new("/nonexistent/audio.wav"),
            ChannelMode::Mixdown,
            Pacing::Fast,
            prod,
            state,
        );
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }

    #[test]
    fn test_start_garbage_file_fails_probe() {
        let path = std::env::temp_dir().join("spectra_rs_probe_garbage.bin");
        std::fs::write(&path, b"this is not an audio container").unwrap();

        let (prod, _cons, _mon) = sample_ring(1024);
        let state = Arc::new(SourceStateCell::new());

        let result = FileInput::start(
            &path,
            ChannelMode::Mixdown,
            Pacing::Fast,
            prod,
            state,
        );
        assert!(matches!(result, Err(DecodeError::Probe(_))));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_resolve_channels_mixdown() {
        let samples = [0.2f32, 0.4];
        let mixed = resolve_channels(|c| samples[c], 2, ChannelMode::Mixdown);
        assert!((mixed - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_resolve_channels_out_of_range_index() {
        let samples = [0.2f32, 0.4];
        assert_eq!(resolve_channels(|c| samples[c], 2, ChannelMode::Index(3)), 0.0);
    }
}
