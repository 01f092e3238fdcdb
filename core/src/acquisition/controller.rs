//! Double-buffered acquisition.
//!
//! Two banks exist for the whole run. One is always owned by the device
//! (filling) while the other is read by the estimators (draining); they swap
//! only when `wait_complete` returns. The next transfer is started before the
//! drained bank is handed out so the free-running pulse generator never
//! overruns.

use crate::acquisition::hardware::{
    AcquisitionDevice, AcquisitionSetup, BankIndex, SampleBank, TransferStatus,
};
use crate::params::RadarParameters;
use crate::prelude::{CoreError, CoreResult};
use crate::processing::buffers::zeroed;
use crate::telemetry::log::LogManager;
use std::time::Duration;

pub struct BankController<D: AcquisitionDevice> {
    device: D,
    setup: AcquisitionSetup,
    dma_bank: BankIndex,
    proc_bank: BankIndex,
    /// Bank owned by the processing side.
    draining: Option<SampleBank>,
    /// Bank 0 until `prime` hands it to the device.
    unprimed: Option<SampleBank>,
    in_flight: bool,
    retrigger_delay: Duration,
    faults: u64,
    logger: LogManager,
}

impl<D: AcquisitionDevice> BankController<D> {
    /// Opens the device and allocates both banks. Nothing is acquired until
    /// [`prime`](Self::prime).
    pub fn new(mut device: D, params: &RadarParameters) -> CoreResult<Self> {
        let setup = AcquisitionSetup::from_params(params);
        device.init(&setup)?;
        let bank_len = setup.bank_len();
        let logger = LogManager::new("acquisition");
        logger.record(&format!(
            "two banks of {} words ({} bytes per transfer)",
            bank_len,
            setup.byte_count()
        ));
        Ok(Self {
            device,
            setup,
            dma_bank: BankIndex::Zero,
            proc_bank: BankIndex::One,
            unprimed: Some(zeroed(bank_len, "sample bank 0")?),
            draining: Some(zeroed(bank_len, "sample bank 1")?),
            in_flight: false,
            retrigger_delay: params.retrigger_delay(),
            faults: 0,
            logger,
        })
    }

    /// Starts the first transfer into bank 0.
    pub fn prime(&mut self) -> CoreResult<()> {
        let bank = self
            .unprimed
            .take()
            .ok_or_else(|| CoreError::Device("acquisition already primed".into()))?;
        self.device.start(self.dma_bank, bank)?;
        self.in_flight = true;
        Ok(())
    }

    pub fn dma_bank(&self) -> BankIndex {
        self.dma_bank
    }

    pub fn proc_bank(&self) -> BankIndex {
        self.proc_bank
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn faults(&self) -> u64 {
        self.faults
    }

    pub fn setup(&self) -> &AcquisitionSetup {
        &self.setup
    }

    /// Waits for the outstanding transfer, restarts the device on the other
    /// bank and returns the status of the finished one. A failed transfer is
    /// logged and counted; its bank is still handed to processing.
    pub fn cycle(&mut self) -> CoreResult<TransferStatus> {
        self.cycle_with(|| {})
    }

    /// As [`cycle`](Self::cycle), running `between` after the flip and before
    /// the next transfer is started. Used to reprogram the mode so the new
    /// transfer is acquired under it; the bank returned by this call was
    /// acquired under the previous configuration.
    pub fn cycle_with<F: FnOnce()>(&mut self, between: F) -> CoreResult<TransferStatus> {
        if !self.in_flight {
            return Err(CoreError::Device("no transfer outstanding".into()));
        }
        let completion = self.device.wait_complete()?;
        self.in_flight = false;
        if completion.index != self.dma_bank {
            self.logger.warn(&format!(
                "device completed {:?} while {:?} was expected",
                completion.index, self.dma_bank
            ));
        }
        match completion.status {
            TransferStatus::Complete => {}
            TransferStatus::Timeout => {
                self.faults += 1;
                self.logger
                    .warn("acquisition timed out, processing partial bank");
            }
            TransferStatus::Failed(code) => {
                self.faults += 1;
                self.logger.warn(&format!(
                    "acquisition failed with status {}, processing partial bank",
                    code
                ));
            }
        }

        self.proc_bank = self.dma_bank;
        self.dma_bank = self.dma_bank.other();
        let spare = self
            .draining
            .replace(completion.bank)
            .ok_or_else(|| CoreError::Device("spare bank missing".into()))?;

        between();
        if !self.retrigger_delay.is_zero() {
            std::thread::sleep(self.retrigger_delay);
        }
        self.device.start(self.dma_bank, spare)?;
        self.in_flight = true;
        Ok(completion.status)
    }

    /// The most recently completed bank.
    pub fn draining(&self) -> &[u16] {
        self.draining.as_deref().unwrap_or(&[])
    }

    /// Waits out the last transfer and releases the device.
    pub fn close(&mut self) {
        if self.in_flight {
            match self.device.wait_complete() {
                Ok(completion) => {
                    self.draining.get_or_insert(completion.bank);
                }
                Err(err) => self
                    .logger
                    .warn(&format!("final transfer lost: {}", err)),
            }
            self.in_flight = false;
        }
        self.device.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::acquisition::hardware::Completion;
    use std::collections::VecDeque;

    /// Device that fills banks with a counter and can be told to fail.
    #[derive(Default)]
    pub(crate) struct ScriptedDevice {
        pub outstanding: Option<(BankIndex, SampleBank)>,
        pub max_outstanding: usize,
        pub starts: Vec<BankIndex>,
        pub statuses: VecDeque<TransferStatus>,
        pub fill: u16,
        pub closed: bool,
    }

    impl AcquisitionDevice for ScriptedDevice {
        fn init(&mut self, _setup: &AcquisitionSetup) -> CoreResult<()> {
            Ok(())
        }

        fn start(&mut self, index: BankIndex, bank: SampleBank) -> CoreResult<()> {
            if self.outstanding.is_some() {
                return Err(CoreError::Device("second transfer started".into()));
            }
            self.starts.push(index);
            self.outstanding = Some((index, bank));
            self.max_outstanding = self.max_outstanding.max(1);
            Ok(())
        }

        fn wait_complete(&mut self) -> CoreResult<Completion> {
            let (index, mut bank) = self
                .outstanding
                .take()
                .ok_or_else(|| CoreError::Device("idle".into()))?;
            let status = self.statuses.pop_front().unwrap_or(TransferStatus::Complete);
            self.fill = self.fill.wrapping_add(1);
            if status.is_complete() {
                bank.iter_mut().for_each(|w| *w = self.fill);
            }
            Ok(Completion {
                index,
                status,
                bank,
            })
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn small_params() -> RadarParameters {
        RadarParameters {
            pulses_per_cycle: 4,
            samples_per_pulse: 3,
            spectra_averaged: 1,
            ..Default::default()
        }
    }

    #[test]
    fn proc_bank_is_always_the_complement_of_dma_bank() {
        let mut controller = BankController::new(ScriptedDevice::default(), &small_params()).unwrap();
        controller.prime().unwrap();
        assert_eq!(controller.dma_bank(), BankIndex::Zero);
        for _ in 0..7 {
            let previous_dma = controller.dma_bank();
            controller.cycle().unwrap();
            assert_eq!(controller.proc_bank(), previous_dma);
            assert_eq!(controller.proc_bank(), controller.dma_bank().other());
            assert!(controller.in_flight());
            assert_eq!(controller.draining().len(), 4 * 3 * 8);
        }
        assert_eq!(controller.device.max_outstanding, 1);
        assert_eq!(
            &controller.device.starts[..4],
            &[BankIndex::Zero, BankIndex::One, BankIndex::Zero, BankIndex::One]
        );
        controller.close();
        assert!(controller.device.closed);
    }

    #[test]
    fn failed_transfer_is_counted_and_acquisition_continues() {
        let device = ScriptedDevice {
            statuses: VecDeque::from(vec![
                TransferStatus::Complete,
                TransferStatus::Timeout,
                TransferStatus::Failed(-5),
                TransferStatus::Complete,
            ]),
            ..Default::default()
        };
        let mut controller = BankController::new(device, &small_params()).unwrap();
        controller.prime().unwrap();
        assert_eq!(controller.cycle().unwrap(), TransferStatus::Complete);
        assert_eq!(controller.draining()[0], 1);
        assert_eq!(controller.cycle().unwrap(), TransferStatus::Timeout);
        assert_eq!(controller.cycle().unwrap(), TransferStatus::Failed(-5));
        assert_eq!(controller.cycle().unwrap(), TransferStatus::Complete);
        assert_eq!(controller.draining()[0], 4);
        assert_eq!(controller.faults(), 2);
    }

    #[test]
    fn hook_runs_between_flip_and_restart() {
        let mut controller = BankController::new(ScriptedDevice::default(), &small_params()).unwrap();
        controller.prime().unwrap();
        let starts_before = controller.device.starts.len();
        let mut ran = false;
        controller.cycle_with(|| ran = true).unwrap();
        assert!(ran);
        assert_eq!(controller.device.starts.len(), starts_before + 1);
    }
}
