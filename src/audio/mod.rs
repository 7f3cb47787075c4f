//! Audio module - sources and sample transport
//!
//! This module provides:
//! - Lock-free sample ring shared between the producer and the analysis
//!   thread
//! - Live input capture from a device
//! - Audio file decoding as an input source

mod buffer;
mod file;
mod input;

pub use buffer::{sample_ring, RingMonitor, SampleConsumer, SampleProducer};
pub use file::{DecodeError, FileInfo, FileInput, Pacing};
pub use input::{list_input_devices, DeviceError, LiveInput};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

/// A fixed-length block of single-channel samples.
///
/// Produced once, never mutated afterwards. The sequence number and start
/// sample tie the frame (and any spectrum derived from it) back to its
/// position in the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    samples: Vec<f32>,
    seq: u64,
    start_sample: u64,
}

impl Frame {
    pub fn new(samples: Vec<f32>, seq: u64, start_sample: u64) -> Self {
        Self {
            samples,
            seq,
            start_sample,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }
}

/// Which source feeds the pipeline.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// Capture from an input device; `None` selects the default device.
    Live { device: Option<String> },
    /// Decode an audio file.
    File { path: PathBuf },
}

/// Terminal-state surface shared by both source variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Delivering samples into the ring.
    Producing,
    /// Ran out of input (end of file). Not an error.
    Finished,
    /// Device or decoder fault after a successful start.
    Failed,
}

/// Atomic cell publishing a [`SourceState`] from the producer side to the
/// consumer side. Producer contexts may not allocate or lock, so the
/// state travels as a single byte.
pub struct SourceStateCell(AtomicU8);

impl SourceStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(SourceState::Producing as u8))
    }

    pub fn set(&self, state: SourceState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> SourceState {
        match self.0.load(Ordering::Acquire) {
            0 => SourceState::Producing,
            1 => SourceState::Finished,
            _ => SourceState::Failed,
        }
    }
}

impl Default for SourceStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_state_cell_round_trip() {
        let cell = SourceStateCell::new();
        assert_eq!(cell.get(), SourceState::Producing);

        cell.set(SourceState::Finished);
        assert_eq!(cell.get(), SourceState::Finished);

        cell.set(SourceState::Failed);
        assert_eq!(cell.get(), SourceState::Failed);
    }
}
