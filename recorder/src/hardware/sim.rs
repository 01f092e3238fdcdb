//! Software stand-ins for the digitiser, the DIO card and the pedestal.

use crate::generator::profile::{build_bank, TargetConfig, TargetGenerator};
use chrono::{DateTime, Utc};
use galileocore::acquisition::{
    AcquisitionDevice, AcquisitionSetup, AntennaPosition, BankIndex, Clock, Completion,
    DigitalIo, DioBank, PositionSource, SampleBank, TransferStatus,
};
use galileocore::params::RadarParameters;
use galileocore::prelude::{CoreError, CoreResult};
use galileocore::run::{ScanConfig, ScanKind};
use galileocore::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How far outside the sector the simulated pedestal starts a sweep.
const SWEEP_RUN_UP_DEG: f32 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub target: TargetConfig,
    /// Every Nth transfer times out.
    pub fail_every: Option<u64>,
    pub scan_rate_dps: f32,
    /// Sleep for the real acquisition time of each bank.
    pub realtime: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            fail_every: None,
            scan_rate_dps: 6.0,
            realtime: false,
        }
    }
}

/// Digitiser that synthesises every bank from a [`TargetGenerator`].
pub struct SimulatedDigitiser {
    params: RadarParameters,
    generator: TargetGenerator,
    fail_every: Option<u64>,
    bank_time: Option<Duration>,
    outstanding: Option<(BankIndex, SampleBank)>,
    transfers: u64,
    logger: LogManager,
}

impl SimulatedDigitiser {
    pub fn new(params: &RadarParameters, config: &SimulationConfig) -> Self {
        let bank_secs =
            params.prt_secs() * (params.pulses_per_cycle * params.spectra_averaged) as f64;
        Self {
            params: params.clone(),
            generator: TargetGenerator::new(params, config.target.clone()),
            fail_every: config.fail_every.filter(|&n| n > 0),
            bank_time: config
                .realtime
                .then(|| Duration::from_secs_f64(bank_secs.max(0.0))),
            outstanding: None,
            transfers: 0,
            logger: LogManager::new("digitiser"),
        }
    }
}

impl AcquisitionDevice for SimulatedDigitiser {
    fn init(&mut self, setup: &AcquisitionSetup) -> CoreResult<()> {
        let expected = AcquisitionSetup::from_params(&self.params);
        if *setup != expected {
            return Err(CoreError::Configuration(format!(
                "digitiser built for {:?}, opened with {:?}",
                expected, setup
            )));
        }
        self.logger.record(&format!(
            "simulated digitiser: {} pulses x {} gates x {} spectra",
            setup.pulses_per_cycle, setup.gates, setup.spectra
        ));
        Ok(())
    }

    fn start(&mut self, index: BankIndex, bank: SampleBank) -> CoreResult<()> {
        if self.outstanding.is_some() {
            return Err(CoreError::Device("transfer already in flight".into()));
        }
        self.outstanding = Some((index, bank));
        Ok(())
    }

    fn wait_complete(&mut self) -> CoreResult<Completion> {
        let (index, mut bank) = self
            .outstanding
            .take()
            .ok_or_else(|| CoreError::Device("no transfer in flight".into()))?;
        self.transfers += 1;
        if let Some(pause) = self.bank_time {
            std::thread::sleep(pause);
        }

        if self.fail_every.is_some_and(|n| self.transfers % n == 0) {
            self.logger
                .debug(&format!("injecting timeout on transfer {}", self.transfers));
            return Ok(Completion {
                index,
                status: TransferStatus::Timeout,
                bank,
            });
        }

        build_bank(&self.params, &mut self.generator, &mut bank)
            .map_err(|err| CoreError::Device(format!("{:#}", err)))?;
        Ok(Completion {
            index,
            status: TransferStatus::Complete,
            bank,
        })
    }

    fn close(&mut self) {
        self.outstanding = None;
        self.logger
            .record(&format!("digitiser closed after {} transfers", self.transfers));
    }
}

/// DIO card that remembers the last value written to each bank.
#[derive(Debug)]
pub struct SimulatedDio {
    registers: HashMap<DioBank, u8>,
    logger: LogManager,
}

impl Default for SimulatedDio {
    fn default() -> Self {
        Self {
            registers: HashMap::new(),
            logger: LogManager::new("dio"),
        }
    }
}

impl SimulatedDio {
    #[cfg(test)]
    pub fn last(&self, bank: DioBank) -> Option<u8> {
        self.registers.get(&bank).copied()
    }
}

impl DigitalIo for SimulatedDio {
    fn write_bank(&mut self, bank: DioBank, value: u8) -> CoreResult<()> {
        self.logger.debug(&format!("{:?} <- {:#04x}", bank, value));
        self.registers.insert(bank, value);
        Ok(())
    }
}

/// Pedestal moving at a constant rate through the configured sector.
pub struct ScanningAntenna<C: Clock> {
    kind: ScanKind,
    start_angle: f32,
    fixed_angle: f32,
    rate_dps: f32,
    started: DateTime<Utc>,
    clock: C,
}

impl<C: Clock> ScanningAntenna<C> {
    pub fn new(scan: &ScanConfig, rate_dps: f32, clock: C) -> Self {
        let rate_dps = scan.scan_velocity_dps.unwrap_or(rate_dps);
        Self {
            kind: scan.kind,
            start_angle: scan.min_angle_deg - SWEEP_RUN_UP_DEG,
            fixed_angle: scan.scan_angle_deg,
            rate_dps,
            started: clock.now(),
            clock,
        }
    }
}

impl<C: Clock> PositionSource for ScanningAntenna<C> {
    fn read(&mut self) -> CoreResult<AntennaPosition> {
        let timestamp = self.clock.now();
        let elapsed = (timestamp - self.started).num_milliseconds() as f32 / 1000.0;
        let swept = self.start_angle + self.rate_dps * elapsed;
        let (azimuth_deg, elevation_deg) = match self.kind {
            ScanKind::Ppi => (swept, self.fixed_angle),
            ScanKind::Rhi | ScanKind::Csp => (self.fixed_angle, swept),
            _ => (self.fixed_angle, self.start_angle + SWEEP_RUN_UP_DEG),
        };
        Ok(AntennaPosition {
            azimuth_deg,
            elevation_deg,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use galileocore::acquisition::BankController;
    use std::sync::Mutex;

    struct SteppedClock(Mutex<DateTime<Utc>>);

    impl Clock for SteppedClock {
        fn now(&self) -> DateTime<Utc> {
            let mut now = self.0.lock().unwrap();
            let current = *now;
            *now += chrono::Duration::seconds(1);
            current
        }
    }

    fn params() -> RadarParameters {
        RadarParameters {
            pulses_per_cycle: 16,
            samples_per_pulse: 40,
            spectra_averaged: 1,
            ..Default::default()
        }
    }

    #[test]
    fn digitiser_injects_periodic_timeouts() {
        let p = params();
        let config = SimulationConfig {
            fail_every: Some(2),
            ..Default::default()
        };
        let mut controller = BankController::new(SimulatedDigitiser::new(&p, &config), &p).unwrap();
        controller.prime().unwrap();
        let statuses: Vec<_> = (0..3).map(|_| controller.cycle().unwrap()).collect();
        assert_eq!(
            statuses,
            vec![
                TransferStatus::Complete,
                TransferStatus::Timeout,
                TransferStatus::Complete
            ]
        );
        assert_eq!(controller.faults(), 1);
        assert!(controller.draining().iter().any(|&w| w != 0));
        assert_eq!(controller.cycle().unwrap(), TransferStatus::Timeout);
    }

    #[test]
    fn digitiser_rejects_mismatched_setup() {
        let p = params();
        let mut digitiser = SimulatedDigitiser::new(&p, &SimulationConfig::default());
        let other = RadarParameters {
            samples_per_pulse: 80,
            ..params()
        };
        assert!(digitiser
            .init(&AcquisitionSetup::from_params(&other))
            .is_err());
    }

    #[test]
    fn dio_keeps_last_write() {
        let mut dio = SimulatedDio::default();
        dio.write_bank(DioBank::PortC, 0x12).unwrap();
        dio.write_bank(DioBank::PortC, 0x34).unwrap();
        assert_eq!(dio.last(DioBank::PortC), Some(0x34));
        assert_eq!(dio.last(DioBank::PortA), None);
    }

    #[test]
    fn ppi_antenna_sweeps_azimuth_into_sector() {
        let scan = ScanConfig {
            kind: ScanKind::Ppi,
            min_angle_deg: 10.0,
            max_angle_deg: 20.0,
            scan_angle_deg: 3.0,
            position_tracking: true,
            ..Default::default()
        };
        let clock = SteppedClock(Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let mut antenna = ScanningAntenna::new(&scan, 1.0, clock);
        let first = antenna.read().unwrap();
        assert_eq!(first.azimuth_deg, 9.0);
        assert_eq!(first.elevation_deg, 3.0);
        assert!(!scan.is_complete(&antenna.read().unwrap(), Duration::ZERO));
    }

    #[test]
    fn rhi_antenna_sweeps_elevation() {
        let scan = ScanConfig {
            kind: ScanKind::Rhi,
            min_angle_deg: 0.0,
            max_angle_deg: 90.0,
            scan_angle_deg: 45.0,
            scan_velocity_dps: Some(10.0),
            ..Default::default()
        };
        let clock = SteppedClock(Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        let mut antenna = ScanningAntenna::new(&scan, 1.0, clock);
        let position = antenna.read().unwrap();
        assert_eq!(position.azimuth_deg, 45.0);
        assert_eq!(position.elevation_deg, 8.0);
    }
}
