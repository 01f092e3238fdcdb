//! Boundary to the digitiser driver.

use crate::params::RadarParameters;
use crate::prelude::CoreResult;

/// Raw interleaved ADC words for one acquisition cycle.
pub type SampleBank = Vec<u16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankIndex {
    Zero,
    One,
}

impl BankIndex {
    pub fn other(self) -> Self {
        match self {
            BankIndex::Zero => BankIndex::One,
            BankIndex::One => BankIndex::Zero,
        }
    }
}

/// Values the driver needs when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSetup {
    pub pulses_per_cycle: usize,
    pub gates: usize,
    pub clock_divisor: u32,
    pub delay_clocks: u32,
    pub spectra: usize,
    pub adc_channels: usize,
}

impl AcquisitionSetup {
    pub fn from_params(params: &RadarParameters) -> Self {
        Self {
            pulses_per_cycle: params.pulses_per_cycle,
            gates: params.samples_per_pulse,
            clock_divisor: params.clock_divfactor,
            delay_clocks: params.delay_clocks,
            spectra: params.spectra_averaged,
            adc_channels: params.adc_channels,
        }
    }

    pub fn bank_len(&self) -> usize {
        self.pulses_per_cycle * self.spectra * self.gates * self.adc_channels
    }

    pub fn byte_count(&self) -> usize {
        self.bank_len() * std::mem::size_of::<u16>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Complete,
    Timeout,
    Failed(i32),
}

impl TransferStatus {
    pub fn is_complete(self) -> bool {
        self == TransferStatus::Complete
    }
}

/// A finished transfer. The bank comes back whatever the status, holding
/// whatever the hardware managed to write.
#[derive(Debug)]
pub struct Completion {
    pub index: BankIndex,
    pub status: TransferStatus,
    pub bank: SampleBank,
}

/// Digitiser with a single outstanding DMA transfer.
///
/// `start` hands a bank to the device; `wait_complete` blocks until that
/// transfer ends and returns the bank. An `Err` from either means the driver
/// itself is unusable, not that one transfer failed.
pub trait AcquisitionDevice {
    fn init(&mut self, setup: &AcquisitionSetup) -> CoreResult<()>;
    fn start(&mut self, index: BankIndex, bank: SampleBank) -> CoreResult<()>;
    fn wait_complete(&mut self) -> CoreResult<Completion>;
    fn close(&mut self);
}

impl<T: AcquisitionDevice + ?Sized> AcquisitionDevice for Box<T> {
    fn init(&mut self, setup: &AcquisitionSetup) -> CoreResult<()> {
        (**self).init(setup)
    }

    fn start(&mut self, index: BankIndex, bank: SampleBank) -> CoreResult<()> {
        (**self).start(index, bank)
    }

    fn wait_complete(&mut self) -> CoreResult<Completion> {
        (**self).wait_complete()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
