//! Splits interleaved ADC frames into named channel arrays.

use crate::params::RadarParameters;
use crate::prelude::{CoreError, CoreResult};
use crate::processing::buffers::zeroed;
use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex32;
use serde::Serialize;

/// ADC midpoint; the polarity flag reads below it when H fired first.
pub const ADC_MIDSCALE: u16 = 2048;

/// Logical channels in the order the digitiser multiplexes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    ICo = 0,
    QCo = 1,
    ICross = 2,
    QCross = 3,
    TxPower1 = 4,
    TxPower2 = 5,
    RawLog = 6,
    Polarity = 7,
}

const CHANNELS: [Channel; 8] = [
    Channel::ICo,
    Channel::QCo,
    Channel::ICross,
    Channel::QCross,
    Channel::TxPower1,
    Channel::TxPower2,
    Channel::RawLog,
    Channel::Polarity,
];

/// Which polarisation fired on even pulses of the current bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum Polarity {
    #[default]
    HorizontalFirst,
    VerticalFirst,
}

impl Polarity {
    pub fn from_flag(flag: u16) -> Self {
        if flag < ADC_MIDSCALE {
            Polarity::HorizontalFirst
        } else {
            Polarity::VerticalFirst
        }
    }

    /// 1 when H fired first. Record `ii` carries H when `(ii + offset) % 2 == 1`.
    pub fn parity_offset(self) -> usize {
        match self {
            Polarity::HorizontalFirst => 1,
            Polarity::VerticalFirst => 0,
        }
    }

    pub fn is_h_record(self, record: usize) -> bool {
        (record + self.parity_offset()) % 2 == 1
    }
}

/// One spectrum cycle, every array shaped (pulses, gates).
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSet {
    pub i_co: Array2<u16>,
    pub q_co: Array2<u16>,
    pub i_cross: Array2<u16>,
    pub q_cross: Array2<u16>,
    pub tx_power1: Array2<u16>,
    pub tx_power2: Array2<u16>,
    pub polarity: Array2<u16>,
    pub raw_log: Array2<u16>,
}

fn plane(pulses: usize, gates: usize, what: &'static str) -> CoreResult<Array2<u16>> {
    let data = zeroed(pulses * gates, what)?;
    Array2::from_shape_vec((pulses, gates), data)
        .map_err(|err| CoreError::Configuration(format!("{} shape: {}", what, err)))
}

impl ChannelSet {
    pub fn new(pulses: usize, gates: usize) -> CoreResult<Self> {
        Ok(Self {
            i_co: plane(pulses, gates, "co-polar I")?,
            q_co: plane(pulses, gates, "co-polar Q")?,
            i_cross: plane(pulses, gates, "cross-polar I")?,
            q_cross: plane(pulses, gates, "cross-polar Q")?,
            tx_power1: plane(pulses, gates, "transmit power 1")?,
            tx_power2: plane(pulses, gates, "transmit power 2")?,
            polarity: plane(pulses, gates, "polarity flag")?,
            raw_log: plane(pulses, gates, "raw log")?,
        })
    }

    pub fn pulses(&self) -> usize {
        self.i_co.nrows()
    }

    pub fn gates(&self) -> usize {
        self.i_co.ncols()
    }

    pub fn co(&self, pulse: usize, gate: usize) -> Complex32 {
        Complex32::new(
            f32::from(self.i_co[[pulse, gate]]),
            f32::from(self.q_co[[pulse, gate]]),
        )
    }

    pub fn cross(&self, pulse: usize, gate: usize) -> Complex32 {
        Complex32::new(
            f32::from(self.i_cross[[pulse, gate]]),
            f32::from(self.q_cross[[pulse, gate]]),
        )
    }

    /// Reads the polarity flag of the first pulse.
    pub fn resolve_polarity(&self) -> Polarity {
        Polarity::from_flag(self.polarity[[0, 0]])
    }

    fn plane_mut(&mut self, channel: Channel) -> &mut Array2<u16> {
        match channel {
            Channel::ICo => &mut self.i_co,
            Channel::QCo => &mut self.q_co,
            Channel::ICross => &mut self.i_cross,
            Channel::QCross => &mut self.q_cross,
            Channel::TxPower1 => &mut self.tx_power1,
            Channel::TxPower2 => &mut self.tx_power2,
            Channel::RawLog => &mut self.raw_log,
            Channel::Polarity => &mut self.polarity,
        }
    }

    /// Copy restricted to the first `gates` gates, for time-series output.
    pub fn truncated(&self, gates: usize) -> ChannelSet {
        let gates = gates.min(self.gates());
        let cut = |a: &Array2<u16>| a.slice(s![.., ..gates]).to_owned();
        ChannelSet {
            i_co: cut(&self.i_co),
            q_co: cut(&self.q_co),
            i_cross: cut(&self.i_cross),
            q_cross: cut(&self.q_cross),
            tx_power1: cut(&self.tx_power1),
            tx_power2: cut(&self.tx_power2),
            polarity: cut(&self.polarity),
            raw_log: cut(&self.raw_log),
        }
    }

    pub fn view(&self, channel: Channel) -> ArrayView2<'_, u16> {
        match channel {
            Channel::ICo => self.i_co.view(),
            Channel::QCo => self.q_co.view(),
            Channel::ICross => self.i_cross.view(),
            Channel::QCross => self.q_cross.view(),
            Channel::TxPower1 => self.tx_power1.view(),
            Channel::TxPower2 => self.tx_power2.view(),
            Channel::RawLog => self.raw_log.view(),
            Channel::Polarity => self.polarity.view(),
        }
    }
}

/// Frame offset of each logical channel for the given ADC channel count.
pub fn dmux_table(adc_channels: usize) -> [usize; 8] {
    if adc_channels == 4 {
        // Only the four receive channels are digitised; the auxiliary
        // channels alias the last one.
        [0, 2, 1, 3, 3, 3, 3, 3]
    } else {
        [0, 4, 1, 5, 2, 6, 3, 7]
    }
}

pub struct ChannelDemux {
    /// Frame offset read for each logical destination channel.
    offsets: [usize; 8],
    adc_channels: usize,
    pulses: usize,
    gates: usize,
}

impl ChannelDemux {
    pub fn new(params: &RadarParameters) -> Self {
        let table = dmux_table(params.adc_channels);
        let mut offsets = table;
        if params.swap_channels {
            offsets[Channel::ICo as usize] = table[Channel::ICross as usize];
            offsets[Channel::QCo as usize] = table[Channel::QCross as usize];
            offsets[Channel::ICross as usize] = table[Channel::ICo as usize];
            offsets[Channel::QCross as usize] = table[Channel::QCo as usize];
        }
        Self {
            offsets,
            adc_channels: params.adc_channels,
            pulses: params.pulses_per_cycle,
            gates: params.samples_per_pulse,
        }
    }

    pub fn allocate(&self) -> CoreResult<ChannelSet> {
        ChannelSet::new(self.pulses, self.gates)
    }

    pub fn spectra_in(&self, bank: &[u16]) -> usize {
        bank.len() / (self.pulses * self.gates * self.adc_channels).max(1)
    }

    /// Extracts spectrum `spectrum` of `bank` into `out`.
    pub fn demux(&self, bank: &[u16], spectrum: usize, out: &mut ChannelSet) -> CoreResult<()> {
        let frame = self.adc_channels;
        let stride = self.pulses * self.gates * frame;
        let start = spectrum * stride;
        let block = bank.get(start..start + stride).ok_or_else(|| {
            CoreError::Configuration(format!(
                "bank of {} words holds no spectrum {}",
                bank.len(),
                spectrum
            ))
        })?;
        for channel in CHANNELS {
            let offset = self.offsets[channel as usize];
            let dest = out.plane_mut(channel);
            for ((pulse, gate), value) in dest.indexed_iter_mut() {
                *value = block[(pulse * self.gates + gate) * frame + offset];
            }
        }
        Ok(())
    }

    /// Inverse of [`demux`](Self::demux): interleaves `channels` into spectrum
    /// `spectrum` of `bank` the way the digitiser does. Where frame slots are
    /// shared, the first channel in multiplex order owns the slot.
    pub fn multiplex(&self, channels: &ChannelSet, spectrum: usize, bank: &mut [u16]) -> CoreResult<()> {
        let frame = self.adc_channels;
        let stride = self.pulses * self.gates * frame;
        let start = spectrum * stride;
        let available = bank.len();
        let block = bank.get_mut(start..start + stride).ok_or_else(|| {
            CoreError::Configuration(format!(
                "bank of {} words has no room for spectrum {}",
                available, spectrum
            ))
        })?;
        let mut written = [false; 8];
        for channel in CHANNELS {
            let offset = self.offsets[channel as usize];
            if offset >= frame || written[offset] {
                continue;
            }
            written[offset] = true;
            for ((pulse, gate), value) in channels.view(channel).indexed_iter() {
                block[(pulse * self.gates + gate) * frame + offset] = *value;
            }
        }
        Ok(())
    }
}
