use crate::params::WindowKind;
use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Forward transform with a fixed plan and window, reused for every gate.
pub struct FftHelper {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Sum of squared window coefficients, the PSD normalisation.
    wss: f32,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(size: usize, kind: WindowKind) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let window = window_coefficients(size, kind);
        let wss = window.iter().map(|w| w * w).sum::<f32>().max(f32::MIN_POSITIVE);
        let scratch = vec![Complex32::zero(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window,
            wss,
            buffer: vec![Complex32::zero(); size],
            scratch,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Windowed periodogram `|X(k)|² / Σw²`, rotated so zero Doppler sits at
    /// bin `len / 2`. `series` shorter than the plan is zero padded.
    pub fn power_spectrum(&mut self, series: &[Complex32], out: &mut [f32]) {
        let size = self.buffer.len();
        let window = &self.window;
        for (index, slot) in self.buffer.iter_mut().enumerate() {
            *slot = match series.get(index) {
                Some(&value) => value * window[index],
                None => Complex32::zero(),
            };
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let half = size / 2;
        for (bin, value) in out.iter_mut().take(size).enumerate() {
            let source = (bin + size - half) % size;
            *value = self.buffer[source].norm_sqr() / self.wss;
        }
    }
}

fn window_coefficients(size: usize, kind: WindowKind) -> Vec<f32> {
    match kind {
        WindowKind::Rectangular => vec![1.0; size],
        WindowKind::Hann => {
            if size < 2 {
                return vec![1.0; size];
            }
            (0..size)
                .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / (size - 1) as f32).cos())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn dc_lands_in_centre_bin() {
        let mut helper = FftHelper::new(8, WindowKind::Rectangular);
        let series = vec![Complex32::new(1.0, 0.0); 8];
        let mut out = vec![0.0; 8];
        helper.power_spectrum(&series, &mut out);
        assert_abs_diff_eq!(out[4], 8.0, epsilon = 1e-4);
        assert_abs_diff_eq!(out.iter().sum::<f32>(), 8.0, epsilon = 1e-4);
    }

    #[test]
    fn positive_tone_lands_above_centre() {
        let size = 16;
        let mut helper = FftHelper::new(size, WindowKind::Hann);
        let series: Vec<Complex32> = (0..size)
            .map(|n| Complex32::from_polar(1.0, 2.0 * PI * 3.0 * n as f32 / size as f32))
            .collect();
        let mut out = vec![0.0; size];
        helper.power_spectrum(&series, &mut out);
        let peak = out
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
            .0;
        assert_eq!(peak, size / 2 + 3);
    }

    #[test]
    fn parseval_holds_for_rectangular_window() {
        let size = 32;
        let mut helper = FftHelper::new(size, WindowKind::Rectangular);
        let series: Vec<Complex32> = (0..size)
            .map(|n| Complex32::new((n as f32 * 0.7).sin(), (n as f32 * 0.3).cos()))
            .collect();
        let energy: f32 = series.iter().map(|c| c.norm_sqr()).sum();
        let mut out = vec![0.0; size];
        helper.power_spectrum(&series, &mut out);
        assert_abs_diff_eq!(out.iter().sum::<f32>(), energy, epsilon = 1e-2);
    }
}
