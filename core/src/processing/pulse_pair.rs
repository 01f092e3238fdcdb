//! Pulse-pair differential phase and velocity.
//!
//! Pairs are formed between alternately polarised pulses. The variable-delay
//! (VD) pair uses the two pulses of a double-pulse transmission, `gate_offset`
//! gates apart in the same record; the fixed-delay (FD) pair uses consecutive
//! records at the same gate. "Odd" pairs have H first, "even" pairs V first.

use crate::math::stats::StatsHelper;
use crate::params::RadarParameters;
use crate::prelude::{CoreError, CoreResult, ProcessingStage, StageInput};
use crate::processing::buffers::zeroed;
use crate::processing::demux::ChannelSet;
use crate::telemetry::log::LogManager;
use num_complex::Complex32;
use std::ops::AddAssign;

/// Correlation and power sums for one lag at one gate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LagSums {
    /// Σ V·conj(H) over H-first pairs, before the phase-offset correction.
    pub odd: Complex32,
    /// Σ H·conj(V) over V-first pairs, before the phase-offset correction.
    pub even: Complex32,
    pub phidp: Complex32,
    pub velocity: Complex32,
    pub ph: f32,
    pub pv: f32,
    pub ph_even: f32,
    pub pv_even: f32,
    pub ph_odd: f32,
    pub pv_odd: f32,
}

impl AddAssign for LagSums {
    fn add_assign(&mut self, rhs: Self) {
        self.odd += rhs.odd;
        self.even += rhs.even;
        self.phidp += rhs.phidp;
        self.velocity += rhs.velocity;
        self.ph += rhs.ph;
        self.pv += rhs.pv;
        self.ph_even += rhs.ph_even;
        self.pv_even += rhs.pv_even;
        self.ph_odd += rhs.ph_odd;
        self.pv_odd += rhs.pv_odd;
    }
}

/// Everything accumulated for one gate over a ray.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GatePairSums {
    pub vd: LagSums,
    pub fd: LagSums,
    /// Power of the H pulse received before its V-first pair.
    pub ph0_even: f32,
    /// Power of the V channel received during the H pulse of an odd pair.
    pub pv0_odd: f32,
}

/// Correlates one set of mean-removed pair series.
///
/// The phase offset is added to the odd product and removed from the even
/// one; half the angle between them is the differential phase, and rotating
/// both by it leaves the Doppler phase in the combined vector.
pub fn pair_lag(
    h_odd: &[Complex32],
    v_odd: &[Complex32],
    h_even: &[Complex32],
    v_even: &[Complex32],
    phidp_offset: f32,
) -> LagSums {
    let mut sums = LagSums::default();
    for (h, v) in h_odd.iter().zip(v_odd) {
        sums.odd += v * h.conj();
        sums.ph_odd += h.norm_sqr();
        sums.pv_odd += v.norm_sqr();
    }
    for (h, v) in h_even.iter().zip(v_even) {
        sums.even += h * v.conj();
        sums.ph_even += h.norm_sqr();
        sums.pv_even += v.norm_sqr();
    }
    sums.ph = sums.ph_odd + sums.ph_even;
    sums.pv = sums.pv_odd + sums.pv_even;

    let correction = Complex32::from_polar(1.0, phidp_offset);
    let odd = sums.odd * correction;
    let even = sums.even * correction.conj();
    sums.phidp = even * odd.conj();
    let half = Complex32::from_polar(1.0, sums.phidp.im.atan2(sums.phidp.re) / 2.0);
    sums.velocity = odd * half + even * half.conj();
    sums
}

#[derive(Default)]
struct PairSeries {
    h_odd: Vec<Complex32>,
    v_odd: Vec<Complex32>,
    v0_odd: Vec<Complex32>,
    h_even: Vec<Complex32>,
    v_even: Vec<Complex32>,
    h0_even: Vec<Complex32>,
}

impl PairSeries {
    fn with_capacity(len: usize) -> CoreResult<Self> {
        let reserve = |what: &'static str| -> CoreResult<Vec<Complex32>> {
            let mut v: Vec<Complex32> = zeroed(len, what)?;
            v.clear();
            Ok(v)
        };
        Ok(Self {
            h_odd: reserve("pulse-pair H odd")?,
            v_odd: reserve("pulse-pair V odd")?,
            v0_odd: reserve("pulse-pair V0 odd")?,
            h_even: reserve("pulse-pair H even")?,
            v_even: reserve("pulse-pair V even")?,
            h0_even: reserve("pulse-pair H0 even")?,
        })
    }

    fn clear(&mut self) {
        for series in self.all_mut() {
            series.clear();
        }
    }

    fn remove_means(&mut self) {
        for series in self.all_mut() {
            StatsHelper::subtract_mean(series);
        }
    }

    fn all_mut(&mut self) -> [&mut Vec<Complex32>; 6] {
        [
            &mut self.h_odd,
            &mut self.v_odd,
            &mut self.v0_odd,
            &mut self.h_even,
            &mut self.v_even,
            &mut self.h0_even,
        ]
    }
}

pub struct PulsePairEstimator {
    phidp_offset: f32,
    nfft: usize,
    sums: Vec<GatePairSums>,
    series: PairSeries,
    logger: LogManager,
}

impl PulsePairEstimator {
    pub fn new(params: &RadarParameters) -> Self {
        Self {
            phidp_offset: params.phidp_offset_rad,
            nfft: 0,
            sums: Vec::new(),
            series: PairSeries::default(),
            logger: LogManager::new("pulse_pair"),
        }
    }

    pub fn sums(&self) -> &[GatePairSums] {
        &self.sums
    }

    fn variable_delay(
        &mut self,
        channels: &ChannelSet,
        is_h: &dyn Fn(usize) -> bool,
        offset: usize,
    ) {
        let records = (self.nfft * 2).min(channels.pulses());
        let gates = channels.gates().min(self.sums.len());
        for gate in 0..gates.saturating_sub(offset) {
            self.series.clear();
            for record in 0..records {
                if is_h(record) {
                    self.series.h_odd.push(channels.co(record, gate));
                    self.series.v_odd.push(channels.cross(record, gate + offset));
                } else {
                    self.series.h_even.push(channels.co(record, gate + offset));
                    self.series.v_even.push(channels.cross(record, gate));
                }
            }
            self.series.remove_means();
            let s = &self.series;
            self.sums[gate].vd += pair_lag(&s.h_odd, &s.v_odd, &s.h_even, &s.v_even, self.phidp_offset);
        }
    }

    fn fixed_delay(&mut self, channels: &ChannelSet, is_h: &dyn Fn(usize) -> bool) {
        let records = (self.nfft.saturating_sub(1) * 2).min(channels.pulses().saturating_sub(1));
        let gates = channels.gates().min(self.sums.len());
        for gate in 0..gates {
            self.series.clear();
            for record in 0..records {
                if is_h(record) {
                    self.series.h_odd.push(channels.co(record, gate));
                    self.series.v_odd.push(channels.cross(record + 1, gate));
                    self.series.v0_odd.push(channels.cross(record, gate));
                } else {
                    self.series.h_even.push(channels.co(record + 1, gate));
                    self.series.v_even.push(channels.cross(record, gate));
                    self.series.h0_even.push(channels.co(record, gate));
                }
            }
            self.series.remove_means();
            let s = &self.series;
            let lag = pair_lag(&s.h_odd, &s.v_odd, &s.h_even, &s.v_even, self.phidp_offset);
            let slot = &mut self.sums[gate];
            slot.fd += lag;
            slot.ph0_even += StatsHelper::power(&s.h0_even);
            slot.pv0_odd += StatsHelper::power(&s.v0_odd);
        }
    }

    /// Double-pulse modes on one polarisation: no cross-pulse correlation,
    /// only the powers of the pair members.
    fn single_polarisation_powers(&mut self, channels: &ChannelSet, h_first: bool, offset: usize) {
        let records = self.nfft.min(channels.pulses());
        let gates = channels.gates().min(self.sums.len());
        for gate in 0..gates.saturating_sub(offset) {
            self.series.clear();
            for record in 0..records {
                if h_first {
                    self.series.h_odd.push(channels.co(record, gate));
                    self.series.v_odd.push(channels.cross(record, gate + offset));
                    self.series.v0_odd.push(channels.cross(record, gate));
                } else {
                    self.series.h_even.push(channels.co(record, gate + offset));
                    self.series.v_even.push(channels.cross(record, gate));
                    self.series.h0_even.push(channels.co(record, gate));
                }
            }
            self.series.remove_means();
            let s = &self.series;
            let mut lag = pair_lag(&s.h_odd, &s.v_odd, &s.h_even, &s.v_even, 0.0);
            lag.odd = Complex32::default();
            lag.even = Complex32::default();
            lag.phidp = Complex32::default();
            lag.velocity = Complex32::default();
            let slot = &mut self.sums[gate];
            slot.vd += lag;
            slot.ph0_even += StatsHelper::power(&s.h0_even);
            slot.pv0_odd += StatsHelper::power(&s.v0_odd);
        }
    }
}

impl ProcessingStage for PulsePairEstimator {
    fn initialize(&mut self, gates: usize, nfft: usize) -> CoreResult<()> {
        self.nfft = nfft;
        self.sums = zeroed(gates, "pulse-pair sums")?;
        self.series = PairSeries::with_capacity(nfft)?;
        Ok(())
    }

    fn execute(&mut self, input: StageInput<'_>) -> CoreResult<()> {
        if self.sums.is_empty() {
            return Err(CoreError::Configuration("pulse-pair estimator not initialised".into()));
        }
        let mode = input.mode;
        let polarity = input.polarity;
        let is_h = move |record: usize| polarity.is_h_record(record);
        if mode.tx_pol == 2 {
            self.variable_delay(input.channels, &is_h, mode.gate_offset);
            self.fixed_delay(input.channels, &is_h);
        } else if mode.mode.is_double_pulse() {
            self.single_polarisation_powers(input.channels, mode.mode.transmits_h(), mode.gate_offset);
        } else {
            self.logger
                .debug(&format!("{:?} forms no pulse pairs", mode.mode));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = GatePairSums::default());
    }
}
