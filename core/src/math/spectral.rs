//! Spectral post-processing primitives: clutter interpolation, peak search
//! against a noise floor and moment extraction.
//!
//! The estimator only talks to these through [`SpectralToolkit`], so a site
//! can swap in a different peak picker without touching the pipeline.

use serde::Serialize;

/// Contiguous run of bins above the noise floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectralPeak {
    pub peak_bin: usize,
    pub peak_power: f32,
    pub left_bin: usize,
    pub right_bin: usize,
}

/// Noise-subtracted moments of a spectrum, in bins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectralMoments {
    pub power: f32,
    pub mean_bin: f32,
    pub width_bins: f32,
}

pub trait SpectralToolkit {
    /// Replaces `bins` bins each side of zero Doppler (and the centre bin)
    /// with a straight line between the neighbouring bins.
    fn interpolate_clutter(&self, psd: &mut [f32], bins: usize);

    /// Finds up to `count` peaks above `noise`. `psd` is not modified.
    fn find_peaks(&self, psd: &[f32], count: usize, noise: f32) -> Vec<SpectralPeak>;

    fn moments(&self, psd: &[f32], peaks: &[SpectralPeak], noise: f32) -> SpectralMoments;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StandardToolkit;

impl SpectralToolkit for StandardToolkit {
    fn interpolate_clutter(&self, psd: &mut [f32], bins: usize) {
        let len = psd.len();
        if bins == 0 || len < 2 * bins + 3 {
            return;
        }
        let centre = len / 2;
        let left = centre - bins - 1;
        let right = centre + bins + 1;
        let span = (right - left) as f32;
        let (start, end) = (psd[left], psd[right]);
        for bin in (left + 1)..right {
            let t = (bin - left) as f32 / span;
            psd[bin] = start + (end - start) * t;
        }
    }

    fn find_peaks(&self, psd: &[f32], count: usize, noise: f32) -> Vec<SpectralPeak> {
        let mut scratch = psd.to_vec();
        let mut peaks = Vec::with_capacity(count);
        while peaks.len() < count {
            let Some((peak_bin, peak_power)) = scratch
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                break;
            };
            if peak_power <= noise {
                break;
            }

            let mut left_bin = peak_bin;
            while left_bin > 0 && scratch[left_bin - 1] > noise {
                left_bin -= 1;
            }
            let mut right_bin = peak_bin;
            while right_bin + 1 < scratch.len() && scratch[right_bin + 1] > noise {
                right_bin += 1;
            }
            for value in &mut scratch[left_bin..=right_bin] {
                *value = noise;
            }
            peaks.push(SpectralPeak {
                peak_bin,
                peak_power,
                left_bin,
                right_bin,
            });
        }
        peaks
    }

    fn moments(&self, psd: &[f32], peaks: &[SpectralPeak], noise: f32) -> SpectralMoments {
        let centre = (psd.len() / 2) as f32;
        let mut m0 = 0.0f64;
        let mut m1 = 0.0f64;
        for peak in peaks {
            for bin in peak.left_bin..=peak.right_bin.min(psd.len().saturating_sub(1)) {
                let p = f64::from((psd[bin] - noise).max(0.0));
                m0 += p;
                m1 += p * bin as f64;
            }
        }
        if m0 <= 0.0 {
            return SpectralMoments {
                power: 0.0,
                mean_bin: centre,
                width_bins: 0.0,
            };
        }
        let mean = m1 / m0;

        let mut m2 = 0.0f64;
        for peak in peaks {
            for bin in peak.left_bin..=peak.right_bin.min(psd.len().saturating_sub(1)) {
                let p = f64::from((psd[bin] - noise).max(0.0));
                let d = bin as f64 - mean;
                m2 += p * d * d;
            }
        }
        SpectralMoments {
            power: m0 as f32,
            mean_bin: mean as f32,
            width_bins: (m2 / m0).sqrt() as f32,
        }
    }
}
