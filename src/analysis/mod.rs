//! Spectral analysis - window tables and the windowed FFT engine
//!
//! This module provides:
//! - Precomputed window coefficient tables
//! - The hop-overlapped FFT engine and the `Spectrum` it emits

mod fft;
mod window;

pub use fft::{FftEngine, Spectrum};
pub use window::{WindowKind, WindowTable};
