//! Ray-level weighted averaging and calibration.

use crate::math::circular::{mean_angle, phasor};
use crate::math::stats::StatsHelper;
use crate::params::{Calibration, RadarParameters};
use crate::prelude::CoreResult;
use crate::processing::buffers::zeroed;
use crate::processing::mode::{ModeContext, PulseMode};
use crate::processing::pulse_pair::{GatePairSums, LagSums};
use crate::processing::spectral::{MomentEstimate, PsdChannel, SpectralSummary};
use crate::processing::tx_power::TxPowerReading;
use crate::products::observables::{Observable, ObservableSet};
use num_complex::Complex32;
use std::f32::consts::PI;

/// Weight given to one gate's moments in the ray average.
pub trait GateWeighting {
    fn weight(&self, gate: usize, co_polar: Option<&MomentEstimate>) -> f32;
}

/// Every moments-iteration counts equally.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformWeighting;

impl GateWeighting for UniformWeighting {
    fn weight(&self, _gate: usize, _co_polar: Option<&MomentEstimate>) -> f32 {
        1.0
    }
}

/// Reflectivity delta that moves gates at or beyond `offset` from their own
/// range onto the range of the first pulse, `offset` gates nearer.
pub fn far_gate_correction(ranges: &[f32], offset: usize) -> Vec<f32> {
    (0..ranges.len())
        .map(|gate| {
            if offset > 0 && gate >= offset {
                -range_term(ranges[gate]) + range_term(ranges[gate - offset])
            } else {
                0.0
            }
        })
        .collect()
}

fn range_term(range: f32) -> f32 {
    10.0 * (range * range).log10()
}

/// `sqrt(|c|² / (pa·pb))`, NaN when the power product is not positive.
pub fn correlation_coefficient(cross: Complex32, pa: f32, pb: f32) -> f32 {
    let denominator = pa * pb;
    if !denominator.is_finite() || denominator <= 0.0 {
        return f32::NAN;
    }
    (cross.norm_sqr() / denominator).sqrt()
}

struct ChannelSums {
    snr: Vec<f32>,
    zed: Vec<f32>,
}

pub struct RayAggregator<W: GateWeighting = UniformWeighting> {
    weighting: W,
    ranges: Vec<f32>,
    calibration: Calibration,
    wavelength_m: f32,
    prt_secs: f32,
    pulse_offset_secs: f32,
    folding_velocity: f32,
    hz_per_mps: f32,
    sum_wi: Vec<f32>,
    channels: [ChannelSums; 4],
    vel_hc: Vec<Complex32>,
    vel_vc: Vec<Complex32>,
    spw_hc: Vec<f32>,
    spw_vc: Vec<f32>,
    npc_h: f32,
    npc_v: f32,
    iterations: usize,
}

impl RayAggregator<UniformWeighting> {
    pub fn new(params: &RadarParameters) -> CoreResult<Self> {
        Self::with_weighting(params, UniformWeighting)
    }
}

impl<W: GateWeighting> RayAggregator<W> {
    pub fn with_weighting(params: &RadarParameters, weighting: W) -> CoreResult<Self> {
        let gates = params.samples_per_pulse;
        let channel = |what: &'static str| -> CoreResult<ChannelSums> {
            Ok(ChannelSums {
                snr: zeroed(gates, what)?,
                zed: zeroed(gates, what)?,
            })
        };
        Ok(Self {
            weighting,
            ranges: params.ranges_m(),
            calibration: params.calibration.clone(),
            wavelength_m: params.wavelength_m() as f32,
            prt_secs: params.prt_secs() as f32,
            pulse_offset_secs: (params.pulse_offset_us * 1.0e-6) as f32,
            folding_velocity: params.folding_velocity(),
            hz_per_mps: params.hz_per_mps(),
            sum_wi: zeroed(gates, "weight sums")?,
            channels: [
                channel("HH sums")?,
                channel("HV sums")?,
                channel("VV sums")?,
                channel("VH sums")?,
            ],
            vel_hc: zeroed(gates, "H velocity phasors")?,
            vel_vc: zeroed(gates, "V velocity phasors")?,
            spw_hc: zeroed(gates, "H width sums")?,
            spw_vc: zeroed(gates, "V width sums")?,
            npc_h: 0.0,
            npc_v: 0.0,
            iterations: 0,
        })
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn hz_per_mps(&self) -> f32 {
        self.hz_per_mps
    }

    pub fn reset(&mut self) {
        self.sum_wi.iter_mut().for_each(|v| *v = 0.0);
        for channel in self.channels.iter_mut() {
            channel.snr.iter_mut().for_each(|v| *v = 0.0);
            channel.zed.iter_mut().for_each(|v| *v = 0.0);
        }
        self.vel_hc.iter_mut().for_each(|v| *v = Complex32::default());
        self.vel_vc.iter_mut().for_each(|v| *v = Complex32::default());
        self.spw_hc.iter_mut().for_each(|v| *v = 0.0);
        self.spw_vc.iter_mut().for_each(|v| *v = 0.0);
        self.npc_h = 0.0;
        self.npc_v = 0.0;
        self.iterations = 0;
    }

    /// Folds one moments-iteration into the ray sums.
    pub fn accumulate(&mut self, summary: &SpectralSummary, mode: PulseMode) {
        let v_only = mode.transmits_v() && !mode.transmits_h();
        let (npc_h, npc_v) = if v_only {
            (PsdChannel::Vh, PsdChannel::Vv)
        } else {
            (PsdChannel::Hh, PsdChannel::Hv)
        };
        if let Some(moments) = summary.channel(npc_h) {
            self.npc_h += moments.noise_level;
        }
        if let Some(moments) = summary.channel(npc_v) {
            self.npc_v += moments.noise_level;
        }

        let reference = if v_only { PsdChannel::Vv } else { PsdChannel::Hh };
        for gate in 0..self.sum_wi.len() {
            let co = summary
                .channel(reference)
                .and_then(|m| m.gates.get(gate));
            let wi = self.weighting.weight(gate, co);
            self.sum_wi[gate] += wi;

            for (index, channel) in PsdChannel::ALL.into_iter().enumerate() {
                let Some(estimate) = summary.channel(channel).and_then(|m| m.gates.get(gate)) else {
                    continue;
                };
                self.channels[index].snr[gate] += estimate.snr * wi;
                self.channels[index].zed[gate] += estimate.power * wi;
                let turn = phasor(estimate.velocity / self.folding_velocity * PI, wi);
                match channel {
                    PsdChannel::Hh => {
                        self.vel_hc[gate] += turn;
                        self.spw_hc[gate] += estimate.width * wi;
                    }
                    PsdChannel::Vv => {
                        self.vel_vc[gate] += turn;
                        self.spw_vc[gate] += estimate.width * wi;
                    }
                    PsdChannel::Hv | PsdChannel::Vh => {}
                }
            }
        }
        self.iterations += 1;
    }

    /// Normalises the ray sums, converts to physical units and applies range
    /// and calibration corrections.
    pub fn finalize(
        &self,
        pairs: &[GatePairSums],
        tx_power: TxPowerReading,
        mode: &ModeContext,
        out: &mut ObservableSet,
    ) {
        let gates = self.sum_wi.len().min(out.gates());
        let vd_scale = self.wavelength_m / (4.0 * PI * self.pulse_offset_secs);
        let fd_scale = self.wavelength_m * mode.tx_pol as f32 / (4.0 * PI * self.prt_secs);
        let empty = GatePairSums::default();
        let db = StatsHelper::to_db;
        let cal = &self.calibration;

        for gate in 0..gates {
            let wi = self.sum_wi[gate];
            let pair = pairs.get(gate).unwrap_or(&empty);
            let hh = &self.channels[0];
            let hv = &self.channels[1];
            let vv = &self.channels[2];
            let vh = &self.channels[3];

            let zed_hc = db(hh.zed[gate] / wi);
            let zed_xhc = db(hv.zed[gate] / wi);
            let zed_vc = db(vv.zed[gate] / wi);
            let zed_xvc = db(vh.zed[gate] / wi);
            out.get_mut(Observable::SnrHc)[gate] = db(hh.snr[gate] / wi);
            out.get_mut(Observable::SnrXhc)[gate] = db(hv.snr[gate] / wi);
            out.get_mut(Observable::SnrVc)[gate] = db(vv.snr[gate] / wi);
            out.get_mut(Observable::SnrXvc)[gate] = db(vh.snr[gate] / wi);
            out.get_mut(Observable::SpwHc)[gate] = self.spw_hc[gate] / wi;
            out.get_mut(Observable::SpwVc)[gate] = self.spw_vc[gate] / wi;
            out.get_mut(Observable::VelHc)[gate] = mean_angle(self.vel_hc[gate]) / PI * self.folding_velocity;
            out.get_mut(Observable::VelVc)[gate] = mean_angle(self.vel_vc[gate]) / PI * self.folding_velocity;

            out.get_mut(Observable::PowH)[gate] = db(pair.fd.ph_odd / wi);
            out.get_mut(Observable::PowHx)[gate] = db(pair.pv0_odd / wi);
            out.get_mut(Observable::PowV)[gate] = db(pair.fd.pv_even / wi);
            out.get_mut(Observable::PowVx)[gate] = db(pair.ph0_even / wi);

            out.get_mut(Observable::VelVd)[gate] = mean_angle(pair.vd.velocity) * vd_scale;
            out.get_mut(Observable::VelFd)[gate] = mean_angle(pair.fd.velocity) * fd_scale;
            out.get_mut(Observable::PhidpVd)[gate] = (mean_angle(pair.vd.phidp) / 2.0).to_degrees();
            out.get_mut(Observable::PhidpFd)[gate] = (mean_angle(pair.fd.phidp) / 2.0).to_degrees();
            out.get_mut(Observable::RhoVd)[gate] = combined_rho(&pair.vd);
            out.get_mut(Observable::RhoFd)[gate] = combined_rho(&pair.fd);
            out.get_mut(Observable::RhoVds)[gate] = split_rho(&pair.vd);
            out.get_mut(Observable::RhoFds)[gate] = split_rho(&pair.fd);

            out.get_mut(Observable::LdrHc)[gate] = zed_xhc - zed_hc + cal.ldr_offset_db;
            out.get_mut(Observable::LdrVc)[gate] = zed_xvc - zed_vc + cal.ldr_offset_db;

            let range = range_term(self.ranges[gate]) + cal.zed_offset_db;
            out.get_mut(Observable::ZedHc)[gate] = zed_hc + range;
            out.get_mut(Observable::ZedXhc)[gate] = zed_xhc + range;
            out.get_mut(Observable::ZedVc)[gate] = zed_vc + range;
            out.get_mut(Observable::ZedXvc)[gate] = zed_xvc + range;
            out.get_mut(Observable::ZdrC)[gate] = zed_hc - zed_vc + cal.zdr_offset_db;
        }

        let correction = far_gate_correction(&self.ranges[..gates], mode.gate_offset);
        for observable in [
            Observable::ZedHc,
            Observable::ZedXhc,
            Observable::ZedVc,
            Observable::ZedXvc,
        ] {
            for (value, delta) in out.get_mut(observable).iter_mut().zip(&correction) {
                *value += delta;
            }
        }

        let w0 = self.sum_wi.first().copied().unwrap_or(0.0);
        out.set_scalar(Observable::NpcH, db(self.npc_h / w0));
        out.set_scalar(Observable::NpcV, db(self.npc_v / w0));
        out.set_scalar(Observable::Tx1a, tx_power.tx_1a);
        out.set_scalar(Observable::Tx2a, tx_power.tx_2a);
        out.set_scalar(Observable::Tx1b, tx_power.tx_1b);
        out.set_scalar(Observable::Tx2b, tx_power.tx_2b);
    }
}

fn combined_rho(lag: &LagSums) -> f32 {
    correlation_coefficient(lag.velocity, lag.ph, lag.pv)
}

/// Mean of the coefficients of the two pair orderings taken separately.
fn split_rho(lag: &LagSums) -> f32 {
    let even = correlation_coefficient(lag.even, lag.ph_even, lag.pv_even);
    let odd = correlation_coefficient(lag.odd, lag.ph_odd, lag.pv_odd);
    0.5 * (even + odd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::mode::ModeSlot;
    use crate::processing::spectral::ChannelMoments;
    use approx::assert_abs_diff_eq;

    fn params() -> RadarParameters {
        RadarParameters {
            samples_per_pulse: 8,
            calibration: Calibration {
                zed_offset_db: 3.0,
                zdr_offset_db: 0.0,
                ldr_offset_db: -1.0,
                range_offset_m: 0.0,
            },
            ..Default::default()
        }
    }

    fn moments(power: f32, velocity: f32, noise: f32) -> ChannelMoments {
        ChannelMoments {
            noise_level: noise,
            gates: vec![
                MomentEstimate {
                    power,
                    snr: power / 10.0,
                    velocity,
                    width: 0.5,
                };
                8
            ],
        }
    }

    fn summary(power: f32, velocity: f32) -> SpectralSummary {
        SpectralSummary {
            hh: Some(moments(power, velocity, 2.0)),
            hv: Some(moments(power / 100.0, velocity, 3.0)),
            vv: Some(moments(power / 2.0, velocity, 2.0)),
            vh: Some(moments(power / 50.0, velocity, 3.0)),
        }
    }

    fn context(offset: usize) -> ModeContext {
        ModeContext {
            slot: ModeSlot::Mode0,
            mode: PulseMode::DoubleHvVh,
            tx_pol: 2,
            gate_offset: offset,
        }
    }

    #[test]
    fn far_gate_correction_round_trips() {
        let ranges: Vec<f32> = (1..=20).map(|g| g as f32 * 30.0).collect();
        let original: Vec<f32> = (0..20).map(|g| 10.0 + g as f32 * 0.5).collect();
        for offset in [1usize, 5, 19] {
            let delta = far_gate_correction(&ranges, offset);
            let corrected: Vec<f32> = original.iter().zip(&delta).map(|(z, d)| z + d).collect();
            for gate in 0..20 {
                let reversed = corrected[gate] + range_term(ranges[gate])
                    - if gate >= offset { range_term(ranges[gate - offset]) } else { range_term(ranges[gate]) };
                assert_abs_diff_eq!(reversed, original[gate], epsilon = 1e-4);
            }
            assert!(delta[..offset].iter().all(|d| *d == 0.0));
        }
    }

    #[test]
    fn degenerate_power_gives_nan_correlation() {
        assert!(correlation_coefficient(Complex32::new(1.0, 0.0), 0.0, 5.0).is_nan());
        assert!(correlation_coefficient(Complex32::new(1.0, 0.0), -1.0, 5.0).is_nan());
        assert!(correlation_coefficient(Complex32::new(1.0, 0.0), f32::INFINITY, 5.0).is_nan());
        assert_abs_diff_eq!(
            correlation_coefficient(Complex32::new(3.0, 4.0), 5.0, 5.0),
            1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn identical_iterations_average_to_themselves() {
        let p = params();
        let mut aggregator = RayAggregator::new(&p).unwrap();
        let fold = p.folding_velocity();
        let velocity = 0.8 * fold;
        for _ in 0..3 {
            aggregator.accumulate(&summary(1000.0, velocity), PulseMode::DoubleHvVh);
        }
        assert_eq!(aggregator.iterations(), 3);
        let mut out = ObservableSet::new(p.samples_per_pulse).unwrap();
        let mode = context(8);
        aggregator.finalize(&[], TxPowerReading::default(), &mode, &mut out);

        let range = range_term(p.ranges_m()[2]);
        assert_abs_diff_eq!(out.get(Observable::ZedHc)[2], 30.0 + range + 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(out.get(Observable::SnrHc)[2], 20.0, epsilon = 1e-3);
        assert_abs_diff_eq!(out.get(Observable::LdrHc)[2], -20.0 - 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(out.get(Observable::ZdrC)[2], 10.0 * 2f32.log10(), epsilon = 1e-3);
        assert_abs_diff_eq!(out.get(Observable::VelHc)[2], velocity, epsilon = 1e-3);
        assert_abs_diff_eq!(out.get(Observable::SpwHc)[2], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(out.scalar(Observable::NpcH), 10.0 * 2f32.log10(), epsilon = 1e-4);
        assert_abs_diff_eq!(out.scalar(Observable::NpcV), 10.0 * 3f32.log10(), epsilon = 1e-4);
    }

    #[test]
    fn velocities_either_side_of_the_fold_average_across_it() {
        let p = params();
        let mut aggregator = RayAggregator::new(&p).unwrap();
        let fold = p.folding_velocity();
        aggregator.accumulate(&summary(100.0, 0.95 * fold), PulseMode::DoubleHvVh);
        aggregator.accumulate(&summary(100.0, -0.95 * fold), PulseMode::DoubleHvVh);
        let mut out = ObservableSet::new(p.samples_per_pulse).unwrap();
        aggregator.finalize(&[], TxPowerReading::default(), &context(8), &mut out);
        assert_abs_diff_eq!(out.get(Observable::VelHc)[0].abs(), fold, epsilon = 1e-2 * fold);
    }

    #[test]
    fn v_only_modes_report_vertical_noise() {
        let p = params();
        let mut aggregator = RayAggregator::new(&p).unwrap();
        let only_v = SpectralSummary {
            vv: Some(moments(10.0, 0.0, 4.0)),
            vh: Some(moments(1.0, 0.0, 5.0)),
            ..Default::default()
        };
        aggregator.accumulate(&only_v, PulseMode::DoubleV);
        let mut out = ObservableSet::new(p.samples_per_pulse).unwrap();
        aggregator.finalize(&[], TxPowerReading::default(), &context(8), &mut out);
        assert_abs_diff_eq!(out.scalar(Observable::NpcH), 10.0 * 5f32.log10(), epsilon = 1e-4);
        assert_abs_diff_eq!(out.scalar(Observable::NpcV), 10.0 * 4f32.log10(), epsilon = 1e-4);
    }

    #[test]
    fn far_gates_are_rebased_after_calibration() {
        let p = params();
        let mut aggregator = RayAggregator::new(&p).unwrap();
        aggregator.accumulate(&summary(1000.0, 0.0), PulseMode::DoubleHvVh);
        let mut out = ObservableSet::new(p.samples_per_pulse).unwrap();
        aggregator.finalize(&[], TxPowerReading::default(), &context(3), &mut out);
        let ranges = p.ranges_m();
        assert_abs_diff_eq!(
            out.get(Observable::ZedVc)[5],
            10.0 * 500f32.log10() + range_term(ranges[2]) + 3.0,
            epsilon = 1e-3
        );
        assert_abs_diff_eq!(
            out.get(Observable::ZedVc)[1],
            10.0 * 500f32.log10() + range_term(ranges[1]) + 3.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn reset_forgets_previous_ray() {
        let p = params();
        let mut aggregator = RayAggregator::new(&p).unwrap();
        aggregator.accumulate(&summary(1000.0, 1.0), PulseMode::DoubleHvVh);
        aggregator.reset();
        assert_eq!(aggregator.iterations(), 0);
        aggregator.accumulate(&summary(10.0, 1.0), PulseMode::DoubleHvVh);
        let mut out = ObservableSet::new(p.samples_per_pulse).unwrap();
        aggregator.finalize(&[], TxPowerReading::default(), &context(8), &mut out);
        assert_abs_diff_eq!(out.get(Observable::SnrHc)[0], 0.0, epsilon = 1e-4);
    }
}
