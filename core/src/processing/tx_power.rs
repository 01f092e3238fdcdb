use crate::processing::demux::{ChannelSet, Polarity};
use serde::Serialize;

/// Gates sampled for the transmit-power monitor, before the second pulse of
/// a pair can arrive.
pub const TX_POWER_GATES: std::ops::Range<usize> = 20..35;

const MILLIVOLTS_PER_COUNT: f32 = 3000.0 / 4096.0;

/// Mean detector voltages in mV. `1`/`2` are the two detectors (before and
/// after the radome), `a`/`b` the pulse of each alternation pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TxPowerReading {
    pub tx_1a: f32,
    pub tx_2a: f32,
    pub tx_1b: f32,
    pub tx_2b: f32,
}

#[derive(Debug, Default)]
pub struct TxPowerMonitor {
    sum: TxPowerReading,
    spectra: usize,
}

impl TxPowerMonitor {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Folds one spectrum into the ray average.
    pub fn add(&mut self, channels: &ChannelSet, polarity: Polarity, gate_offset: usize) {
        let end = TX_POWER_GATES.end.min(gate_offset).min(channels.gates());
        let start = TX_POWER_GATES.start;
        if end <= start || channels.pulses() < 2 {
            return;
        }
        let (mut t1a, mut t1b, mut t2a, mut t2b) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for gate in start..end {
            for pair in 0..channels.pulses() / 2 {
                let (a, b) = match polarity {
                    Polarity::VerticalFirst => (2 * pair, 2 * pair + 1),
                    Polarity::HorizontalFirst => (2 * pair + 1, 2 * pair),
                };
                t1a += f64::from(channels.tx_power1[[a, gate]]);
                t1b += f64::from(channels.tx_power1[[b, gate]]);
                t2a += f64::from(channels.tx_power2[[a, gate]]);
                t2b += f64::from(channels.tx_power2[[b, gate]]);
            }
        }
        // Each sum covers half the pulses, hence the factor of two.
        let scale = 2.0 / ((end - start) * channels.pulses()) as f64;
        let to_mv = |sum: f64| (sum * scale) as f32 * MILLIVOLTS_PER_COUNT;
        self.sum.tx_1a += to_mv(t1a);
        self.sum.tx_1b += to_mv(t1b);
        self.sum.tx_2a += to_mv(t2a);
        self.sum.tx_2b += to_mv(t2b);
        self.spectra += 1;
    }

    pub fn reading(&self) -> TxPowerReading {
        if self.spectra == 0 {
            return TxPowerReading::default();
        }
        let n = self.spectra as f32;
        TxPowerReading {
            tx_1a: self.sum.tx_1a / n,
            tx_2a: self.sum.tx_2a / n,
            tx_1b: self.sum.tx_1b / n,
            tx_2b: self.sum.tx_2b / n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn alternating_set(first: u16, second: u16) -> ChannelSet {
        let mut set = ChannelSet::new(8, 60).unwrap();
        for ((pulse, _), value) in set.tx_power1.indexed_iter_mut() {
            *value = if pulse % 2 == 0 { first } else { second };
        }
        set.tx_power2.fill(4096);
        set
    }

    #[test]
    fn pulses_are_split_by_polarity() {
        let set = alternating_set(1024, 2048);
        let mut monitor = TxPowerMonitor::default();
        monitor.add(&set, Polarity::VerticalFirst, 100);
        let reading = monitor.reading();
        assert_abs_diff_eq!(reading.tx_1a, 750.0, epsilon = 1e-3);
        assert_abs_diff_eq!(reading.tx_1b, 1500.0, epsilon = 1e-3);
        assert_abs_diff_eq!(reading.tx_2a, 3000.0, epsilon = 1e-3);

        monitor.reset();
        monitor.add(&set, Polarity::HorizontalFirst, 100);
        assert_abs_diff_eq!(monitor.reading().tx_1a, 1500.0, epsilon = 1e-3);
    }

    #[test]
    fn ray_average_spans_spectra() {
        let mut monitor = TxPowerMonitor::default();
        monitor.add(&alternating_set(1024, 1024), Polarity::VerticalFirst, 100);
        monitor.add(&alternating_set(3072, 3072), Polarity::VerticalFirst, 100);
        assert_abs_diff_eq!(monitor.reading().tx_1a, 1500.0, epsilon = 1e-3);
    }

    #[test]
    fn short_pulse_offset_leaves_no_gates() {
        let mut monitor = TxPowerMonitor::default();
        monitor.add(&alternating_set(1024, 1024), Polarity::VerticalFirst, 20);
        assert_eq!(monitor.reading(), TxPowerReading::default());
    }
}
