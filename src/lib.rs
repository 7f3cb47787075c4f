//! spectra-rs - real-time audio spectrum analysis
//!
//! Samples flow from a live input device or a decoded audio file through
//! a lock-free ring buffer into a windowed, hop-overlapped FFT, and out
//! to a registered callback as complex spectra.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod pipeline;

pub use analysis::{FftEngine, Spectrum, WindowKind};
pub use audio::{Frame, Pacing, SourceSpec, SourceState};
pub use config::{AnalyzerConfig, ChannelMode};
pub use pipeline::{Diagnostics, Pipeline, PipelineError, PipelineState};
