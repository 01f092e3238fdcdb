//! Run-time radar configuration.
//!
//! `RadarParameters` is loaded once by the outer configuration layer and only
//! read by the core. Everything the estimators need beyond the raw settings
//! (FFT length, Doppler bin width, gate ranges...) is derived here so the
//! numbers stay consistent between stages.

use crate::prelude::{CoreError, CoreResult};
use crate::processing::mode::PulseMode;
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Speed of light expressed in metres per nanosecond (m·GHz).
pub const SPEED_OF_LIGHT_M_PER_NS: f64 = 0.299_792_458;

/// Number of far gates treated as noise-only when estimating the noise floor.
pub const NOISE_GATES: usize = 50;

/// Window applied to each pulse series before the Fourier transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rectangular,
    #[default]
    Hann,
}

/// Calibration offsets loaded from the site calibration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Calibration {
    pub zed_offset_db: f32,
    pub zdr_offset_db: f32,
    pub ldr_offset_db: f32,
    pub range_offset_m: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarParameters {
    /// Transmit frequency in GHz.
    pub frequency_ghz: f64,
    /// Repetition frequency of same-polarisation pulses.
    pub prf_hz: f64,
    pub pulses_per_cycle: usize,
    /// Range gates digitised per pulse.
    pub samples_per_pulse: usize,
    pub adc_channels: usize,
    pub adc_clock_hz: f64,
    pub clock_divfactor: u32,
    pub delay_clocks: u32,
    /// Transmitted chip length in ns.
    pub chip_length_ns: f64,
    pub pulses_coherently_averaged: usize,
    pub spectra_averaged: usize,
    pub moments_averaged: usize,
    /// Half-width, in bins, of the band interpolated over around zero Doppler.
    pub clutter_bins: usize,
    pub num_peaks: usize,
    /// Delay between the two pulses of a double-pulse pair, in µs.
    pub pulse_offset_us: f64,
    /// Differential-phase offset removed from the pulse-pair estimators, in rad.
    pub phidp_offset_rad: f32,
    pub window: WindowKind,
    pub long_pulse_mode: bool,
    pub alternate_modes: bool,
    pub mode0: PulseMode,
    pub mode1: PulseMode,
    pub nrays_mode0: u32,
    pub nrays_mode1: u32,
    /// Swap the co- and cross-polar ADC inputs.
    pub swap_channels: bool,
    /// Gates kept when recording raw time series. `None` keeps every gate.
    pub time_series_gates: Option<usize>,
    /// Cadence of full spectra snapshots in seconds, 0 disables.
    pub dump_spectra_secs: u64,
    /// Cadence of rapid spectra snapshots in seconds, 0 disables.
    pub dump_spectra_rapid_secs: u64,
    pub calibration: Calibration,
}

impl Default for RadarParameters {
    fn default() -> Self {
        Self {
            frequency_ghz: 94.0,
            prf_hz: 5000.0,
            pulses_per_cycle: 256,
            samples_per_pulse: 300,
            adc_channels: 8,
            adc_clock_hz: 10.0e6,
            clock_divfactor: 2,
            delay_clocks: 4,
            chip_length_ns: 200.0,
            pulses_coherently_averaged: 1,
            spectra_averaged: 4,
            moments_averaged: 1,
            clutter_bins: 2,
            num_peaks: 1,
            pulse_offset_us: 20.0,
            phidp_offset_rad: 0.0,
            window: WindowKind::Hann,
            long_pulse_mode: false,
            alternate_modes: false,
            mode0: PulseMode::DoubleHvVh,
            mode1: PulseMode::SingleH,
            nrays_mode0: 1,
            nrays_mode1: 1,
            swap_channels: false,
            time_series_gates: None,
            dump_spectra_secs: 0,
            dump_spectra_rapid_secs: 0,
            calibration: Calibration::default(),
        }
    }
}

impl RadarParameters {
    pub fn wavelength_m(&self) -> f64 {
        SPEED_OF_LIGHT_M_PER_NS / self.frequency_ghz
    }

    pub fn prt_secs(&self) -> f64 {
        1.0 / self.prf_hz
    }

    pub fn sample_period_secs(&self) -> f64 {
        f64::from(self.clock_divfactor) / self.adc_clock_hz
    }

    pub fn gate_width_m(&self) -> f64 {
        self.sample_period_secs() * SPEED_OF_LIGHT_M_PER_NS * 1.0e9 / 2.0
    }

    /// Index of the first digitised gate counted from the transmit pulse.
    pub fn first_gate(&self) -> u32 {
        self.delay_clocks / self.clock_divfactor.max(1) + 1
    }

    /// Centre range of every gate in metres, calibration offset included.
    pub fn ranges_m(&self) -> Vec<f32> {
        let width = self.gate_width_m();
        let first = f64::from(self.first_gate());
        (0..self.samples_per_pulse)
            .map(|gate| {
                ((first + gate as f64) * width) as f32 + self.calibration.range_offset_m
            })
            .collect()
    }

    /// Gate shift between the two pulses of a double-pulse pair.
    pub fn pulse_pair_gate_offset(&self) -> usize {
        let gates = (self.pulse_offset_us * 1.0e-6 / self.sample_period_secs() + 0.5) as usize;
        gates.min(self.samples_per_pulse)
    }

    /// Largest number of transmit polarisations any configured mode uses.
    pub fn max_tx_pol(&self) -> usize {
        let mut count = self.mode0.tx_pol_count();
        if self.alternate_modes {
            count = count.max(self.mode1.tx_pol_count());
        }
        count
    }

    /// Pulses per Fourier series, fixed for the whole run.
    pub fn nfft(&self) -> usize {
        self.pulses_per_cycle / (self.pulses_coherently_averaged.max(1) * self.max_tx_pol())
    }

    pub fn npsd(&self) -> usize {
        self.nfft()
    }

    /// Width of one Doppler bin in Hz.
    pub fn frequency_bin_width(&self) -> f32 {
        let coh = self.pulses_coherently_averaged.max(1) as f64;
        (self.prf_hz / (coh * self.nfft().max(1) as f64)) as f32
    }

    pub fn hz_per_mps(&self) -> f32 {
        (2.0 / self.wavelength_m()) as f32
    }

    /// Unambiguous Doppler velocity of the spectral estimator.
    pub fn folding_velocity(&self) -> f32 {
        let coh = self.pulses_coherently_averaged.max(1) as f64;
        (self.wavelength_m() * self.prf_hz / (4.0 * coh)) as f32
    }

    /// Pause inserted before restarting acquisition so the polarisation
    /// switch does not hit its timeout.
    ///
    /// Two PRTs, pulled back when closer than 100 µs to a 500 µs boundary and
    /// then rounded down to that boundary.
    pub fn retrigger_delay(&self) -> Duration {
        let mut micros = (self.prt_secs() * 2.0e6) as i64;
        if micros % 500 < 100 {
            micros -= 500;
        }
        micros -= micros.rem_euclid(500);
        Duration::from_micros(micros.max(0) as u64)
    }

    /// 16-bit words in one acquisition bank.
    pub fn bank_len(&self) -> usize {
        self.pulses_per_cycle * self.spectra_averaged * self.samples_per_pulse * self.adc_channels
    }

    pub fn transfer_bytes(&self) -> usize {
        self.bank_len() * std::mem::size_of::<u16>()
    }

    /// Gates handed to the time-series recorder.
    pub fn time_series_gate_count(&self) -> usize {
        self.time_series_gates
            .unwrap_or(self.samples_per_pulse)
            .min(self.samples_per_pulse)
    }

    /// First gate of the noise-only region at the far end of the profile.
    pub fn noise_region_start(&self) -> usize {
        self.samples_per_pulse.saturating_sub(NOISE_GATES)
    }

    /// Rejects unusable settings and clamps the recoverable ones.
    pub fn validate(&mut self) -> CoreResult<()> {
        if self.samples_per_pulse == 0 {
            return Err(CoreError::Configuration("samples_per_pulse is zero".into()));
        }
        if self.adc_channels != 4 && self.adc_channels != 8 {
            return Err(CoreError::Configuration(format!(
                "unsupported ADC channel count {}",
                self.adc_channels
            )));
        }
        if self.frequency_ghz <= 0.0 || self.prf_hz <= 0.0 || self.adc_clock_hz <= 0.0 {
            return Err(CoreError::Configuration(
                "frequency, PRF and ADC clock must be positive".into(),
            ));
        }
        if self.clock_divfactor == 0 {
            return Err(CoreError::Configuration("clock_divfactor is zero".into()));
        }
        if self.spectra_averaged == 0 || self.moments_averaged == 0 {
            return Err(CoreError::Configuration(
                "spectra and moments averaging counts must be at least one".into(),
            ));
        }
        if self.nfft() < 2 {
            return Err(CoreError::Configuration(format!(
                "{} pulses per cycle leave fewer than two pulses per series",
                self.pulses_per_cycle
            )));
        }

        if let Some(gates) = self.time_series_gates {
            if gates > self.samples_per_pulse {
                warn!(
                    "time-series gates {} exceed {} gates, clamping",
                    gates, self.samples_per_pulse
                );
                self.time_series_gates = Some(self.samples_per_pulse);
            }
        }
        if self.alternate_modes && self.nrays_mode0 + self.nrays_mode1 == 0 {
            warn!("mode alternation requested with zero rays per cycle, staying in mode0");
            self.alternate_modes = false;
        }
        if self.samples_per_pulse < NOISE_GATES {
            warn!(
                "only {} gates, noise floor taken over the whole profile",
                self.samples_per_pulse
            );
        }
        Ok(())
    }
}
