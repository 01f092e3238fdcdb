//! Pulse-mode state machine.
//!
//! Two mode slots are configured per run. When alternation is enabled the
//! radar runs `nrays_mode0` rays in slot 0 followed by `nrays_mode1` rays in
//! slot 1. A switch is scheduled at the end of a ray and applied at the start
//! of the next one, after the bank acquired under the old mode is discarded.

use crate::acquisition::dio::{pulse_offset_bytes, DigitalIo, DioBank, ALL_PORTS_OUTPUT};
use crate::params::RadarParameters;
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};

/// Transmit pattern selected on the DIO card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PulseMode {
    #[default]
    Undefined,
    SingleH,
    SingleV,
    SingleHV,
    DoubleH,
    DoubleV,
    DoubleHvVh,
    DoubleHvHv,
}

impl PulseMode {
    pub fn code(self) -> u8 {
        match self {
            PulseMode::Undefined => 0,
            PulseMode::SingleH => 1,
            PulseMode::SingleV => 2,
            PulseMode::SingleHV => 3,
            PulseMode::DoubleH => 4,
            PulseMode::DoubleV => 5,
            PulseMode::DoubleHvVh => 6,
            PulseMode::DoubleHvHv => 7,
        }
    }

    /// Decodes the low three bits of a mode selector.
    pub fn from_code(code: u8) -> Self {
        match code & 0x07 {
            1 => PulseMode::SingleH,
            2 => PulseMode::SingleV,
            3 => PulseMode::SingleHV,
            4 => PulseMode::DoubleH,
            5 => PulseMode::DoubleV,
            6 => PulseMode::DoubleHvVh,
            7 => PulseMode::DoubleHvHv,
            _ => PulseMode::Undefined,
        }
    }

    /// Number of polarisations transmitted in alternation.
    pub fn tx_pol_count(self) -> usize {
        match self {
            PulseMode::SingleHV | PulseMode::DoubleHvVh | PulseMode::DoubleHvHv => 2,
            _ => 1,
        }
    }

    pub fn is_double_pulse(self) -> bool {
        self.code() >= PulseMode::DoubleH.code()
    }

    pub fn transmits_h(self) -> bool {
        !matches!(
            self,
            PulseMode::Undefined | PulseMode::SingleV | PulseMode::DoubleV
        )
    }

    pub fn transmits_v(self) -> bool {
        !matches!(
            self,
            PulseMode::Undefined | PulseMode::SingleH | PulseMode::DoubleH
        )
    }

    /// Gate shift between paired samples: the whole profile for single-pulse
    /// modes, the configured pulse-pair offset for double-pulse modes.
    pub fn gate_offset(self, gates: usize, pulse_pair_offset: usize) -> usize {
        if self.is_double_pulse() {
            pulse_pair_offset
        } else {
            gates
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeSlot {
    Mode0,
    Mode1,
}

/// Per-mode values the estimators read while a mode is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeContext {
    pub slot: ModeSlot,
    pub mode: PulseMode,
    pub tx_pol: usize,
    pub gate_offset: usize,
}

impl ModeContext {
    pub fn new(slot: ModeSlot, mode: PulseMode, gates: usize, pulse_pair_offset: usize) -> Self {
        Self {
            slot,
            mode,
            tx_pol: mode.tx_pol_count(),
            gate_offset: mode.gate_offset(gates, pulse_pair_offset),
        }
    }
}

/// Builds the port C byte: mode selector in the high nibble (bit 3 set for
/// short pulses) and chip length in 100 ns units in the low nibble.
pub fn mode_byte(mode: PulseMode, long_pulse: bool, chip_length_ns: f64) -> u8 {
    let chip = ((chip_length_ns / 100.0 + 0.5) as u8) & 0x0F;
    let selector = if long_pulse {
        mode.code()
    } else {
        mode.code() | 0x08
    };
    (selector << 4) | chip
}

pub struct ModeStateMachine<D: DigitalIo> {
    io: D,
    modes: [PulseMode; 2],
    bytes: [u8; 2],
    pulse_offset_bytes: (u8, u8),
    alternate: bool,
    nrays: [u32; 2],
    ray_count: u32,
    pending: Option<ModeSlot>,
    current: ModeContext,
    gates: usize,
    pulse_pair_offset: usize,
    logger: LogManager,
}

impl<D: DigitalIo> ModeStateMachine<D> {
    pub fn new(params: &RadarParameters, io: D) -> Self {
        let gates = params.samples_per_pulse;
        let pulse_pair_offset = params.pulse_pair_gate_offset();
        let modes = [params.mode0, params.mode1];
        Self {
            io,
            modes,
            bytes: [
                mode_byte(modes[0], params.long_pulse_mode, params.chip_length_ns),
                mode_byte(modes[1], params.long_pulse_mode, params.chip_length_ns),
            ],
            pulse_offset_bytes: pulse_offset_bytes(params.pulse_offset_us),
            alternate: params.alternate_modes && !params.long_pulse_mode,
            nrays: [params.nrays_mode0, params.nrays_mode1],
            ray_count: 0,
            pending: None,
            current: ModeContext::new(ModeSlot::Mode0, modes[0], gates, pulse_pair_offset),
            gates,
            pulse_pair_offset,
            logger: LogManager::new("mode"),
        }
    }

    /// Sets the port directions, loads the pulse offset and selects mode0.
    pub fn configure(&mut self) {
        self.write(DioBank::Configuration, ALL_PORTS_OUTPUT);
        let (low, high) = self.pulse_offset_bytes;
        self.write(DioBank::PortA, low);
        self.write(DioBank::PortB, high);
        self.apply(ModeSlot::Mode0);
        self.pending = None;
    }

    pub fn current(&self) -> &ModeContext {
        &self.current
    }

    pub fn pending(&self) -> Option<ModeSlot> {
        self.pending
    }

    pub fn ray_count(&self) -> u32 {
        self.ray_count
    }

    pub fn begin_ray(&mut self) {
        self.ray_count += 1;
    }

    /// Removes the scheduled switch, if any, so the caller can discard the
    /// in-flight bank before applying it.
    pub fn take_pending(&mut self) -> Option<ModeSlot> {
        self.pending.take()
    }

    /// Writes the slot's mode byte and recomputes the mode context.
    pub fn apply(&mut self, slot: ModeSlot) {
        let index = slot_index(slot);
        self.current = ModeContext::new(
            slot,
            self.modes[index],
            self.gates,
            self.pulse_pair_offset,
        );
        self.write(DioBank::PortC, self.bytes[index]);
        self.logger.record(&format!(
            "mode {:?} active ({:?}, tx_pol {}, gate offset {})",
            slot, self.current.mode, self.current.tx_pol, self.current.gate_offset
        ));
    }

    /// Schedules the switch for the next ray from the position in the
    /// alternation cycle.
    pub fn end_ray(&mut self) -> Option<ModeSlot> {
        self.pending = if self.alternate {
            let remainder = self.ray_count % (self.nrays[0] + self.nrays[1]);
            if remainder == 0 {
                self.ray_count = 0;
                Some(ModeSlot::Mode0)
            } else if remainder == self.nrays[0] {
                Some(ModeSlot::Mode1)
            } else {
                None
            }
        } else {
            None
        };
        self.pending
    }

    fn write(&mut self, bank: DioBank, value: u8) {
        match self.io.write_bank(bank, value) {
            Ok(()) => self
                .logger
                .debug(&format!("wrote {:#04x} to {:?}", value, bank)),
            Err(err) => self
                .logger
                .warn(&format!("cannot write {:#04x} to {:?}: {}", value, bank, err)),
        }
    }
}

fn slot_index(slot: ModeSlot) -> usize {
    match slot {
        ModeSlot::Mode0 => 0,
        ModeSlot::Mode1 => 1,
    }
}
