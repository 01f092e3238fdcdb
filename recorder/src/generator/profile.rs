use anyhow::Context;
use galileocore::params::RadarParameters;
use galileocore::processing::demux::{ChannelDemux, ChannelSet, Polarity, ADC_MIDSCALE};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Flag levels written on the polarity channel.
const FLAG_H: u16 = 1000;
const FLAG_V: u16 = 3000;

/// Dual-polarisation point target used by the simulated digitiser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub velocity_mps: f64,
    pub phidp_deg: f64,
    /// Co-polar amplitude in ADC counts.
    pub amplitude: f64,
    /// Cross-polar amplitude relative to co-polar.
    pub cross_ratio: f64,
    pub first_gate: usize,
    pub last_gate: usize,
    /// Uniform noise half-width in ADC counts, applied to every gate.
    pub noise: f64,
    pub tx_power_counts: u16,
    pub vertical_first: bool,
    pub seed: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            velocity_mps: 1.5,
            phidp_deg: 10.0,
            amplitude: 600.0,
            cross_ratio: 0.1,
            first_gate: 40,
            last_gate: 120,
            noise: 8.0,
            tx_power_counts: 2800,
            vertical_first: false,
            seed: 0,
        }
    }
}

impl TargetConfig {
    fn polarity(&self) -> Polarity {
        if self.vertical_first {
            Polarity::VerticalFirst
        } else {
            Polarity::HorizontalFirst
        }
    }
}

/// Fills successive spectrum cycles with a target whose phase keeps running
/// from one cycle to the next.
pub struct TargetGenerator {
    config: TargetConfig,
    rng: StdRng,
    omega: f64,
    record_spacing: f64,
    pulse_offset: f64,
    records_emitted: u64,
}

impl TargetGenerator {
    pub fn new(params: &RadarParameters, config: TargetConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            omega: 4.0 * PI * config.velocity_mps / params.wavelength_m(),
            record_spacing: params.prt_secs() / 2.0,
            pulse_offset: params.pulse_offset_us * 1.0e-6,
            config,
            rng,
            records_emitted: 0,
        }
    }

    /// Overwrites every channel of `set` with the next cycle. The second
    /// pulse of each record lands `pulse_offset` later on the channel that
    /// did not transmit first.
    pub fn fill(&mut self, set: &mut ChannelSet) {
        let polarity = self.config.polarity();
        let phidp = self.config.phidp_deg.to_radians();
        let cross_amplitude = self.config.amplitude * self.config.cross_ratio;
        let gates = set.gates();
        let target = self.config.first_gate.min(gates)..self.config.last_gate.min(gates);
        let noise = self.config.noise.abs();

        for record in 0..set.pulses() {
            let t = (self.records_emitted + record as u64) as f64 * self.record_spacing;
            let h_record = polarity.is_h_record(record);
            let co_phase = self.omega * (t + if h_record { 0.0 } else { self.pulse_offset });
            let cross_phase =
                self.omega * (t + if h_record { self.pulse_offset } else { 0.0 }) + phidp;
            let flag = if h_record { FLAG_H } else { FLAG_V };

            for gate in 0..gates {
                let (co_amp, cross_amp) = if target.contains(&gate) {
                    (self.config.amplitude, cross_amplitude)
                } else {
                    (0.0, 0.0)
                };
                let mut jitter = || {
                    if noise > 0.0 {
                        self.rng.gen_range(-noise..noise)
                    } else {
                        0.0
                    }
                };
                set.i_co[[record, gate]] = quantise(co_amp * co_phase.cos() + jitter());
                set.q_co[[record, gate]] = quantise(co_amp * co_phase.sin() + jitter());
                set.i_cross[[record, gate]] = quantise(cross_amp * cross_phase.cos() + jitter());
                set.q_cross[[record, gate]] = quantise(cross_amp * cross_phase.sin() + jitter());
                set.tx_power1[[record, gate]] = self.config.tx_power_counts;
                set.tx_power2[[record, gate]] = self.config.tx_power_counts / 2;
                set.raw_log[[record, gate]] = ADC_MIDSCALE;
                set.polarity[[record, gate]] = flag;
            }
        }
        self.records_emitted += set.pulses() as u64;
    }
}

fn quantise(value: f64) -> u16 {
    (f64::from(ADC_MIDSCALE) + value).round().clamp(0.0, 4095.0) as u16
}

/// One complete multiplexed bank, every spectrum drawn from `generator`.
pub fn build_bank(
    params: &RadarParameters,
    generator: &mut TargetGenerator,
    bank: &mut [u16],
) -> anyhow::Result<()> {
    let demux = ChannelDemux::new(params);
    let mut set = demux.allocate().context("allocating generator channels")?;
    for spectrum in 0..params.spectra_averaged {
        generator.fill(&mut set);
        demux
            .multiplex(&set, spectrum, bank)
            .context("multiplexing synthetic spectrum")?;
    }
    Ok(())
}
