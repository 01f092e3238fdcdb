use crate::prelude::CoreResult;
use serde::{Deserialize, Serialize};

/// Symbolic register banks on the auxiliary digital I/O card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DioBank {
    /// Port direction register.
    Configuration,
    /// Low byte of the BCD pulse offset.
    PortA,
    /// High byte of the BCD pulse offset.
    PortB,
    /// Mode selector and chip length.
    PortC,
}

/// Value that sets every port of the card to output.
pub const ALL_PORTS_OUTPUT: u8 = 0x07;

/// Register-level access to the digital I/O card that selects the radar mode.
pub trait DigitalIo {
    fn write_bank(&mut self, bank: DioBank, value: u8) -> CoreResult<()>;
}

impl<T: DigitalIo + ?Sized> DigitalIo for Box<T> {
    fn write_bank(&mut self, bank: DioBank, value: u8) -> CoreResult<()> {
        (**self).write_bank(bank, value)
    }
}

/// Stand-in used when the recorder runs without the DIO card.
#[derive(Debug, Default)]
pub struct NullDigitalIo;

impl DigitalIo for NullDigitalIo {
    fn write_bank(&mut self, _bank: DioBank, _value: u8) -> CoreResult<()> {
        Ok(())
    }
}

/// Packs a decimal value into binary-coded decimal, one digit per nibble.
pub fn dec_to_bcd(value: u16) -> u16 {
    let mut remaining = value;
    let mut bcd = 0u16;
    let mut shift = 0;
    while remaining > 0 && shift < 16 {
        bcd |= (remaining % 10) << shift;
        remaining /= 10;
        shift += 4;
    }
    bcd
}

/// Pulse offset as written to ports A and B.
///
/// The card counts in 100 ns units and needs 100 µs added to the offset
/// (less the 0.2 µs trigger latency) before the BCD conversion.
pub fn pulse_offset_bytes(pulse_offset_us: f64) -> (u8, u8) {
    let units = ((pulse_offset_us - 0.2 + 100.0) * 10.0 + 0.5) as u16;
    let bcd = dec_to_bcd(units);
    ((bcd & 0xFF) as u8, (bcd >> 8) as u8)
}
