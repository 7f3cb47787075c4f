//! Windowed FFT engine
//!
//! Consumes single-channel samples, assembles hop-overlapped frames, and
//! produces complex spectra. The transform size is fixed at construction:
//! the rustfft plan, scratch space, window table, and frame assembly
//! buffers are all preallocated, so the steady-state path performs no
//! allocation besides the emitted `Spectrum` itself (built on the
//! consumer thread, which is allowed to allocate).

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::window::{WindowKind, WindowTable};
use crate::audio::Frame;

/// Complex spectrum of one windowed frame.
///
/// Holds the `N/2 + 1` non-redundant bins of a real-valued input. The
/// sequence number and start sample identify the source frame.
#[derive(Debug, Clone)]
pub struct Spectrum {
    bins: Vec<Complex<f32>>,
    seq: u64,
    start_sample: u64,
    sample_rate: u32,
    frame_size: usize,
}

impl Spectrum {
    pub fn bins(&self) -> &[Complex<f32>] {
        &self.bins
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// |X[k]|
    pub fn magnitude(&self, bin: usize) -> f32 {
        self.bins[bin].norm()
    }

    /// Phase of bin `k` in radians.
    pub fn phase(&self, bin: usize) -> f32 {
        self.bins[bin].arg()
    }

    /// Center frequency of bin `k`: `k * sample_rate / N`.
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.frame_size as f32
    }

    /// Bin with the largest magnitude.
    pub fn dominant_bin(&self) -> usize {
        let mut best = 0;
        let mut best_norm = 0.0f32;
        for (k, c) in self.bins.iter().enumerate() {
            let n = c.norm_sqr();
            if n > best_norm {
                best_norm = n;
                best = k;
            }
        }
        best
    }

    pub fn dominant_frequency(&self) -> f32 {
        self.bin_frequency(self.dominant_bin())
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Index of the first sample of the source frame within the stream.
    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Fixed-size windowed transform with hop-overlapped streaming input.
pub struct FftEngine {
    frame_size: usize,
    hop_size: usize,
    sample_rate: u32,
    window: WindowTable,
    fft: Arc<dyn Fft<f32>>,
    input: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    // Streaming state: retains the trailing frame_size - hop_size samples
    // between emissions so consecutive frames overlap.
    pending: VecDeque<f32>,
    seq: u64,
    next_start: u64,
}

impl FftEngine {
    pub fn new(
        frame_size: usize,
        hop_size: usize,
        window: WindowKind,
        sample_rate: u32,
    ) -> Self {
        assert!(
            frame_size.is_power_of_two(),
            "frame size must be a power of two, got {frame_size}"
        );
        assert!(
            hop_size >= 1 && hop_size <= frame_size,
            "hop size {hop_size} out of range 1..={frame_size}"
        );

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            frame_size,
            hop_size,
            sample_rate,
            window: WindowTable::new(window, frame_size),
            fft,
            input: vec![Complex::new(0.0, 0.0); frame_size],
            scratch,
            pending: VecDeque::with_capacity(2 * frame_size),
            seq: 0,
            next_start: 0,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Bins per spectrum: `frame_size / 2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Transform one complete frame.
    ///
    /// The frame length must equal the transform size; anything else is a
    /// caller bug and panics.
    pub fn process(&mut self, frame: &Frame) -> Spectrum {
        assert_eq!(
            frame.len(),
            self.frame_size,
            "frame length {} does not match transform size {}",
            frame.len(),
            self.frame_size
        );

        let Self { window, input, .. } = &mut *self;
        let coeffs = window.coefficients();
        for (slot, (&sample, &w)) in input
            .iter_mut()
            .zip(frame.samples().iter().zip(coeffs.iter()))
        {
            *slot = Complex::new(sample * w, 0.0);
        }

        self.run_transform(frame.seq(), frame.start_sample())
    }

    /// Streaming entry: append samples, emit one spectrum per hop once a
    /// full frame is buffered. The trailing `frame_size - hop_size`
    /// samples stay buffered for the next overlapping frame.
    pub fn feed(&mut self, samples: &[f32], mut emit: impl FnMut(Spectrum)) {
        self.pending.extend(samples.iter().copied());

        while self.pending.len() >= self.frame_size {
            let Self {
                window,
                input,
                pending,
                ..
            } = &mut *self;
            let coeffs = window.coefficients();
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = Complex::new(pending[i] * coeffs[i], 0.0);
            }

            let spectrum = self.run_transform(self.seq, self.next_start);
            self.seq += 1;
            self.next_start += self.hop_size as u64;
            self.pending.drain(..self.hop_size);

            emit(spectrum);
        }
    }

    /// Samples buffered towards the next frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn run_transform(&mut self, seq: u64, start_sample: u64) -> Spectrum {
        self.fft
            .process_with_scratch(&mut self.input, &mut self.scratch);

        Spectrum {
            bins: self.input[..self.frame_size / 2 + 1].to_vec(),
            seq,
            start_sample,
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
        }
    }
}
