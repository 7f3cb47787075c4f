//! Window coefficient tables
//!
//! Tables are computed once at engine construction and shared read-only
//! afterwards; the transform path never evaluates a cosine.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Supported analysis windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Rectangular,
}

/// Precomputed window of a fixed length.
///
/// Hann and Hamming use the periodic form: copies advanced by half the
/// length sum to a constant, which is what makes hop-overlapped analysis
/// cover every sample with equal weight.
pub struct WindowTable {
    kind: WindowKind,
    coeffs: Vec<f32>,
}

impl WindowTable {
    pub fn new(kind: WindowKind, size: usize) -> Self {
        let coeffs = match kind {
            WindowKind::Hann => (0..size)
                .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
                .collect(),
            WindowKind::Hamming => (0..size)
                .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / size as f32).cos())
                .collect(),
            WindowKind::Rectangular => vec![1.0; size],
        };

        Self { kind, coeffs }
    }

    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    #[inline]
    pub fn coefficients(&self) -> &[f32] {
        &self.coeffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_edges_and_center() {
        let size = 1024;
        let table = WindowTable::new(WindowKind::Hann, size);
        let w = table.coefficients();

        // Near zero at the edges, one at the center
        assert!(w[0].abs() < 0.01);
        assert!(w[size - 1].abs() < 0.01);
        assert!((w[size / 2] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_hamming_endpoints() {
        let table = WindowTable::new(WindowKind::Hamming, 512);
        let w = table.coefficients();
        assert!((w[0] - 0.08).abs() < 1e-4);
        assert!((w[256] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_rectangular_is_all_ones() {
        let table = WindowTable::new(WindowKind::Rectangular, 64);
        assert!(table.coefficients().iter().all(|&c| c == 1.0));
    }

    #[test]
    fn test_hann_half_overlap_sums_to_constant() {
        let size = 1024;
        let hop = size / 2;
        let table = WindowTable::new(WindowKind::Hann, size);
        let w = table.coefficients();

        for i in 0..hop {
            let sum = w[i] + w[i + hop];
            assert!(
                (sum - 1.0).abs() < 1e-5,
                "overlapped window sum at {} is {}",
                i,
                sum
            );
        }
    }

    #[test]
    fn test_overlap_add_reconstructs_signal() {
        // Windowed segments at hop H, summed and normalized by the
        // accumulated window weight, must reproduce the input.
        let size = 256;
        let hop = 128;
        let table = WindowTable::new(WindowKind::Hann, size);
        let w = table.coefficients();

        let signal: Vec<f32> = (0..2048)
            .map(|i| (i as f32 * 0.013).sin() * 0.5 + (i as f32 * 0.004).cos() * 0.25)
            .collect();

        let mut acc = vec![0.0f32; signal.len()];
        let mut weight = vec![0.0f32; signal.len()];
        let mut start = 0;
        while start + size <= signal.len() {
            for i in 0..size {
                acc[start + i] += signal[start + i] * w[i];
                weight[start + i] += w[i];
            }
            start += hop;
        }

        // Interior samples only: the first and last segments have partial
        // window coverage.
        for i in size..(signal.len() - size) {
            let reconstructed = acc[i] / weight[i];
            assert!(
                (reconstructed - signal[i]).abs() < 1e-4,
                "sample {} reconstructed as {} expected {}",
                i,
                reconstructed,
                signal[i]
            );
        }
    }
}
