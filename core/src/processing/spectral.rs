//! Incoherently averaged Doppler spectra and their moments.
//!
//! Each spectrum cycle adds `PSD / spectra_averaged` into the table; the
//! table is read once per moments-iteration (noise floor, clutter band,
//! peaks, moments) and then reset.

use crate::math::fft::FftHelper;
use crate::math::spectral::SpectralToolkit;
use crate::math::stats::StatsHelper;
use crate::params::{RadarParameters, WindowKind};
use crate::prelude::{CoreError, CoreResult, ProcessingStage, StageInput};
use crate::processing::buffers::zeroed;
use crate::processing::demux::ChannelSet;
use crate::processing::mode::PulseMode;
use crate::telemetry::log::LogManager;
use ndarray::{Array2, ArrayView1, Axis};
use num_complex::Complex32;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PsdChannel {
    Hh,
    Hv,
    Vv,
    Vh,
}

impl PsdChannel {
    pub const ALL: [PsdChannel; 4] = [PsdChannel::Hh, PsdChannel::Hv, PsdChannel::Vv, PsdChannel::Vh];

    pub fn name(self) -> &'static str {
        match self {
            PsdChannel::Hh => "HH",
            PsdChannel::Hv => "HV",
            PsdChannel::Vv => "VV",
            PsdChannel::Vh => "VH",
        }
    }

    /// Whether `mode` produces this spectrum.
    pub fn active_in(self, mode: PulseMode) -> bool {
        match self {
            PsdChannel::Hh | PsdChannel::Hv => mode.transmits_h(),
            PsdChannel::Vv | PsdChannel::Vh => mode.transmits_v(),
        }
    }

    /// Receive path: co-polar for HH and VH, cross-polar for HV and VV.
    fn reads_co(self) -> bool {
        matches!(self, PsdChannel::Hh | PsdChannel::Vh)
    }

    fn transmit_h(self) -> bool {
        matches!(self, PsdChannel::Hh | PsdChannel::Hv)
    }
}

/// Averaged spectra, each shaped (gates, npsd) with zero Doppler at
/// `npsd / 2`.
#[derive(Debug, Clone, Serialize)]
pub struct PsdTable {
    pub hh: Array2<f32>,
    pub hv: Array2<f32>,
    pub vv: Array2<f32>,
    pub vh: Array2<f32>,
}

fn psd_plane(gates: usize, npsd: usize, what: &'static str) -> CoreResult<Array2<f32>> {
    Array2::from_shape_vec((gates, npsd), zeroed(gates * npsd, what)?)
        .map_err(|err| CoreError::Configuration(format!("{} shape: {}", what, err)))
}

impl PsdTable {
    pub fn new(gates: usize, npsd: usize) -> CoreResult<Self> {
        Ok(Self {
            hh: psd_plane(gates, npsd, "HH spectra")?,
            hv: psd_plane(gates, npsd, "HV spectra")?,
            vv: psd_plane(gates, npsd, "VV spectra")?,
            vh: psd_plane(gates, npsd, "VH spectra")?,
        })
    }

    pub fn channel(&self, channel: PsdChannel) -> &Array2<f32> {
        match channel {
            PsdChannel::Hh => &self.hh,
            PsdChannel::Hv => &self.hv,
            PsdChannel::Vv => &self.vv,
            PsdChannel::Vh => &self.vh,
        }
    }

    pub fn channel_mut(&mut self, channel: PsdChannel) -> &mut Array2<f32> {
        match channel {
            PsdChannel::Hh => &mut self.hh,
            PsdChannel::Hv => &mut self.hv,
            PsdChannel::Vv => &mut self.vv,
            PsdChannel::Vh => &mut self.vh,
        }
    }

    pub fn gates(&self) -> usize {
        self.hh.nrows()
    }

    pub fn npsd(&self) -> usize {
        self.hh.ncols()
    }

    pub fn reset(&mut self) {
        for channel in PsdChannel::ALL {
            self.channel_mut(channel).fill(0.0);
        }
    }
}

/// Physical moments of one gate of one spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MomentEstimate {
    /// Signal power above noise, PSD units × Hz.
    pub power: f32,
    pub snr: f32,
    /// Mean Doppler velocity in m/s.
    pub velocity: f32,
    /// Spectral width in m/s.
    pub width: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelMoments {
    /// Per-bin noise level.
    pub noise_level: f32,
    pub gates: Vec<MomentEstimate>,
}

/// Output of one moments-iteration; a channel is `None` when the mode does
/// not produce it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpectralSummary {
    pub hh: Option<ChannelMoments>,
    pub hv: Option<ChannelMoments>,
    pub vv: Option<ChannelMoments>,
    pub vh: Option<ChannelMoments>,
}

impl SpectralSummary {
    pub fn channel(&self, channel: PsdChannel) -> Option<&ChannelMoments> {
        match channel {
            PsdChannel::Hh => self.hh.as_ref(),
            PsdChannel::Hv => self.hv.as_ref(),
            PsdChannel::Vv => self.vv.as_ref(),
            PsdChannel::Vh => self.vh.as_ref(),
        }
    }

    fn slot(&mut self, channel: PsdChannel) -> &mut Option<ChannelMoments> {
        match channel {
            PsdChannel::Hh => &mut self.hh,
            PsdChannel::Hv => &mut self.hv,
            PsdChannel::Vv => &mut self.vv,
            PsdChannel::Vh => &mut self.vh,
        }
    }
}

/// Doppler-axis scaling shared by the moment conversion.
#[derive(Debug, Clone, Copy)]
pub struct DopplerAxis {
    pub npsd: usize,
    pub bin_width_hz: f32,
    pub hz_per_mps: f32,
}

impl DopplerAxis {
    pub fn from_params(params: &RadarParameters) -> Self {
        Self {
            npsd: params.npsd(),
            bin_width_hz: params.frequency_bin_width(),
            hz_per_mps: params.hz_per_mps(),
        }
    }

    pub fn bin_to_velocity(&self, bin: f32) -> f32 {
        (bin - (self.npsd / 2) as f32) * self.bin_width_hz / self.hz_per_mps
    }

    /// Noise power over the whole spectrum for a per-bin level.
    pub fn noise_power(&self, level: f32) -> f32 {
        level * self.npsd as f32 * self.bin_width_hz
    }
}

pub struct SpectralEstimator {
    window: WindowKind,
    spectra_averaged: usize,
    clutter_bins: usize,
    num_peaks: usize,
    noise_start: usize,
    axis: DopplerAxis,
    fft: Option<FftHelper>,
    table: Option<PsdTable>,
    series: Vec<Complex32>,
    current: Vec<f32>,
    logger: LogManager,
}

impl SpectralEstimator {
    pub fn new(params: &RadarParameters) -> Self {
        Self {
            window: params.window,
            spectra_averaged: params.spectra_averaged.max(1),
            clutter_bins: params.clutter_bins,
            num_peaks: params.num_peaks.max(1),
            noise_start: params.noise_region_start(),
            axis: DopplerAxis::from_params(params),
            fft: None,
            table: None,
            series: Vec::new(),
            current: Vec::new(),
            logger: LogManager::new("spectral"),
        }
    }

    pub fn table(&self) -> Option<&PsdTable> {
        self.table.as_ref()
    }

    pub fn axis(&self) -> DopplerAxis {
        self.axis
    }

    fn accumulate(
        &mut self,
        channels: &ChannelSet,
        channel: PsdChannel,
        mode: PulseMode,
        tx_pol: usize,
        is_h_record: impl Fn(usize) -> bool,
    ) -> CoreResult<()> {
        let (Some(fft), Some(table)) = (self.fft.as_mut(), self.table.as_mut()) else {
            return Err(CoreError::Configuration("spectral estimator not initialised".into()));
        };
        let nfft = self.series.len();
        let records = (nfft * tx_pol).min(channels.pulses());
        let scale = 1.0 / self.spectra_averaged as f32;
        let plane = table.channel_mut(channel);

        for gate in 0..plane.nrows() {
            self.series.iter_mut().for_each(|c| *c = Complex32::default());
            let mut filled = 0;
            for record in 0..records {
                let selected = if tx_pol == 2 {
                    is_h_record(record) == channel.transmit_h()
                } else {
                    true
                };
                if !selected {
                    continue;
                }
                let slot = if tx_pol == 2 { record / 2 } else { record };
                if slot >= nfft {
                    break;
                }
                self.series[slot] = if channel.reads_co() {
                    channels.co(record, gate)
                } else {
                    channels.cross(record, gate)
                };
                filled += 1;
            }
            if filled == 0 {
                continue;
            }
            StatsHelper::subtract_mean(&mut self.series);
            fft.power_spectrum(&self.series, &mut self.current);
            let mut row = plane.row_mut(gate);
            for (acc, &p) in row.iter_mut().zip(self.current.iter()) {
                *acc += p * scale;
            }
        }
        self.logger.debug(&format!(
            "accumulated {} for {:?} over {} records",
            channel.name(),
            mode,
            records
        ));
        Ok(())
    }

    /// Mean of the per-gate medians across the far gates.
    pub fn noise_level(&self, channel: PsdChannel) -> f32 {
        let Some(table) = self.table.as_ref() else {
            return 0.0;
        };
        let plane = table.channel(channel);
        let start = self.noise_start.min(plane.nrows().saturating_sub(1));
        let medians: Vec<f32> = plane
            .axis_iter(Axis(0))
            .skip(start)
            .map(|row: ArrayView1<f32>| StatsHelper::median(&row.to_vec()))
            .collect();
        StatsHelper::mean(&medians)
    }

    /// Noise floor, clutter interpolation, peak search and moments for every
    /// spectrum the mode produced. Clutter interpolation edits the table.
    pub fn extract_moments<T: SpectralToolkit>(
        &mut self,
        mode: PulseMode,
        toolkit: &T,
    ) -> SpectralSummary {
        let mut summary = SpectralSummary::default();
        for channel in PsdChannel::ALL {
            if !channel.active_in(mode) {
                continue;
            }
            let noise_level = self.noise_level(channel);
            let noise_power = self.axis.noise_power(noise_level);
            let Some(table) = self.table.as_mut() else {
                break;
            };
            let plane = table.channel_mut(channel);
            let mut gates = Vec::with_capacity(plane.nrows());
            for mut row in plane.axis_iter_mut(Axis(0)) {
                let Some(spectrum) = row.as_slice_mut() else {
                    gates.push(MomentEstimate::default());
                    continue;
                };
                toolkit.interpolate_clutter(spectrum, self.clutter_bins);
                let peaks = toolkit.find_peaks(spectrum, self.num_peaks, noise_level);
                let moments = toolkit.moments(spectrum, &peaks, noise_level);
                let power = moments.power * self.axis.bin_width_hz;
                gates.push(MomentEstimate {
                    power,
                    snr: power / noise_power,
                    velocity: self.axis.bin_to_velocity(moments.mean_bin),
                    width: moments.width_bins * self.axis.bin_width_hz / self.axis.hz_per_mps,
                });
            }
            self.logger.debug(&format!(
                "{} noise level {:.3e} ({:.1} dB)",
                channel.name(),
                noise_level,
                StatsHelper::to_db(noise_level)
            ));
            *summary.slot(channel) = Some(ChannelMoments { noise_level, gates });
        }
        summary
    }
}

impl ProcessingStage for SpectralEstimator {
    fn initialize(&mut self, gates: usize, nfft: usize) -> CoreResult<()> {
        self.fft = Some(FftHelper::new(nfft, self.window));
        self.table = Some(PsdTable::new(gates, nfft)?);
        self.series = zeroed(nfft, "Fourier input series")?;
        self.current = zeroed(nfft, "current spectrum")?;
        Ok(())
    }

    fn execute(&mut self, input: StageInput<'_>) -> CoreResult<()> {
        let mode = input.mode.mode;
        let tx_pol = input.mode.tx_pol;
        let polarity = input.polarity;
        for channel in PsdChannel::ALL {
            if channel.active_in(mode) {
                self.accumulate(input.channels, channel, mode, tx_pol, |record| {
                    polarity.is_h_record(record)
                })?;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(table) = self.table.as_mut() {
            table.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::spectral::StandardToolkit;
    use crate::processing::demux::Polarity;
    use crate::processing::mode::{ModeContext, ModeSlot};
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    const GATES: usize = 60;
    const NFFT: usize = 32;

    fn params() -> RadarParameters {
        RadarParameters {
            pulses_per_cycle: 2 * NFFT,
            samples_per_pulse: GATES,
            spectra_averaged: 3,
            mode0: PulseMode::DoubleHvVh,
            window: WindowKind::Rectangular,
            clutter_bins: 0,
            ..Default::default()
        }
    }

    /// Co-polar tone at `bin` on the H records of the near gates, a small
    /// deterministic ripple everywhere else.
    fn tone_set(bin: f32, amplitude: f32, polarity: Polarity) -> ChannelSet {
        let mut set = ChannelSet::new(2 * NFFT, GATES).unwrap();
        for record in 0..2 * NFFT {
            for gate in 0..GATES {
                let phase = 2.0 * PI * bin * (record / 2) as f32 / NFFT as f32;
                let (i, q) = if polarity.is_h_record(record) && gate < 10 {
                    (amplitude * phase.cos(), amplitude * phase.sin())
                } else {
                    (((record * 5 + gate) % 3) as f32, ((record + 2 * gate) % 3) as f32)
                };
                set.i_co[[record, gate]] = (2048.0 + i).round() as u16;
                set.q_co[[record, gate]] = (2048.0 + q).round() as u16;
                set.i_cross[[record, gate]] = 2048 + ((record * 7 + gate * 3) % 5) as u16;
                set.q_cross[[record, gate]] = 2048 + ((record * 3 + gate) % 4) as u16;
            }
        }
        set.polarity.fill(if polarity == Polarity::HorizontalFirst { 0 } else { 4000 });
        set
    }

    fn run(estimator: &mut SpectralEstimator, set: &ChannelSet, polarity: Polarity) {
        let p = params();
        let mode = ModeContext::new(ModeSlot::Mode0, p.mode0, GATES, 10);
        estimator
            .execute(StageInput {
                channels: set,
                mode: &mode,
                polarity,
            })
            .unwrap();
    }

    #[test]
    fn accumulation_is_order_independent() {
        let sets = [
            tone_set(3.0, 200.0, Polarity::HorizontalFirst),
            tone_set(-5.0, 120.0, Polarity::HorizontalFirst),
            tone_set(7.0, 60.0, Polarity::HorizontalFirst),
        ];
        let mut forward = SpectralEstimator::new(&params());
        forward.initialize(GATES, NFFT).unwrap();
        let mut backward = SpectralEstimator::new(&params());
        backward.initialize(GATES, NFFT).unwrap();
        for set in sets.iter() {
            run(&mut forward, set, Polarity::HorizontalFirst);
        }
        for set in sets.iter().rev() {
            run(&mut backward, set, Polarity::HorizontalFirst);
        }
        let (a, b) = (forward.table().unwrap(), backward.table().unwrap());
        for (x, y) in a.hh.iter().zip(b.hh.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-2 * x.abs().max(1.0));
        }
    }

    #[test]
    fn averaged_table_equals_single_spectrum_for_identical_inputs() {
        let set = tone_set(4.0, 150.0, Polarity::HorizontalFirst);
        let mut once = SpectralEstimator::new(&RadarParameters {
            spectra_averaged: 1,
            ..params()
        });
        once.initialize(GATES, NFFT).unwrap();
        run(&mut once, &set, Polarity::HorizontalFirst);

        let mut thrice = SpectralEstimator::new(&params());
        thrice.initialize(GATES, NFFT).unwrap();
        for _ in 0..3 {
            run(&mut thrice, &set, Polarity::HorizontalFirst);
        }
        let (a, b) = (once.table().unwrap(), thrice.table().unwrap());
        for (x, y) in a.hh.iter().zip(b.hh.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-3 * x.abs().max(1.0));
        }
    }

    #[test]
    fn tone_velocity_is_recovered_from_h_records() {
        let p = params();
        let axis = DopplerAxis::from_params(&p);
        for polarity in [Polarity::HorizontalFirst, Polarity::VerticalFirst] {
            let mut estimator = SpectralEstimator::new(&p);
            estimator.initialize(GATES, NFFT).unwrap();
            for _ in 0..3 {
                run(&mut estimator, &tone_set(5.0, 300.0, polarity), polarity);
            }
            let summary = estimator.extract_moments(PulseMode::DoubleHvVh, &StandardToolkit);
            let hh = summary.hh.as_ref().unwrap();
            let expected = axis.bin_to_velocity((NFFT / 2) as f32 + 5.0);
            assert_abs_diff_eq!(hh.gates[0].velocity, expected, epsilon = 0.05);
            assert!(hh.gates[0].snr > 100.0);
            assert!(summary.vv.is_some());
        }
    }

    #[test]
    fn h_only_modes_skip_vertical_spectra() {
        let mut estimator = SpectralEstimator::new(&params());
        estimator.initialize(GATES, NFFT).unwrap();
        let summary = estimator.extract_moments(PulseMode::DoubleH, &StandardToolkit);
        assert!(summary.hh.is_some() && summary.hv.is_some());
        assert!(summary.vv.is_none() && summary.vh.is_none());
    }

    #[test]
    fn reset_clears_the_table() {
        let mut estimator = SpectralEstimator::new(&params());
        estimator.initialize(GATES, NFFT).unwrap();
        run(
            &mut estimator,
            &tone_set(2.0, 100.0, Polarity::HorizontalFirst),
            Polarity::HorizontalFirst,
        );
        assert!(estimator.table().unwrap().hh.sum() > 0.0);
        estimator.reset();
        assert_eq!(estimator.table().unwrap().hh.sum(), 0.0);
    }

    #[test]
    fn zero_doppler_bin_maps_to_zero_velocity() {
        let axis = DopplerAxis::from_params(&params());
        assert_eq!(axis.bin_to_velocity((axis.npsd / 2) as f32), 0.0);
        let one_bin = axis.bin_width_hz / axis.hz_per_mps;
        assert_abs_diff_eq!(axis.bin_to_velocity((axis.npsd / 2 + 1) as f32), one_bin, epsilon = 1e-6);
    }
}
