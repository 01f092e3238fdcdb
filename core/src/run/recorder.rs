//! The ray loop.
//!
//! Each ray runs `moments_averaged` iterations. An iteration waits for one
//! bank, restarts the device on the other, then demultiplexes every spectrum
//! of the drained bank through the transmit-power monitor and the spectral
//! and pulse-pair estimators. Spectral moments are folded into the ray after
//! each iteration; pulse-pair sums run for the whole ray. A pending mode
//! switch costs one extra cycle whose bank is dropped, since it was acquired
//! under the previous mode.

use crate::acquisition::controller::BankController;
use crate::acquisition::dio::DigitalIo;
use crate::acquisition::hardware::{AcquisitionDevice, TransferStatus};
use crate::acquisition::position::{AntennaPosition, PositionSource};
use crate::math::spectral::StandardToolkit;
use crate::params::RadarParameters;
use crate::prelude::{CoreResult, ProcessingStage, StageInput};
use crate::processing::aggregator::RayAggregator;
use crate::processing::demux::{ChannelDemux, ChannelSet, Polarity};
use crate::processing::mode::{ModeContext, ModeStateMachine};
use crate::processing::pulse_pair::PulsePairEstimator;
use crate::processing::spectral::SpectralEstimator;
use crate::processing::tx_power::TxPowerMonitor;
use crate::products::observables::{ObservableSet, RayHeader};
use crate::products::sink::{RaySink, SpectraHeader, SpectraKind, SpectraSchedule};
use crate::run::context::RunContext;
use crate::run::scan::{wait_scan_start, ScanConfig};
use crate::telemetry::log::LogManager;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ScanComplete,
    Cancelled,
    DayChanged,
    RayLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub rays_written: u64,
    pub rays_discarded: u64,
    pub hardware_faults: u64,
    pub stop: StopReason,
}

pub struct RayRecorder<D, I, P, S>
where
    D: AcquisitionDevice,
    I: DigitalIo,
    P: PositionSource,
    S: RaySink,
{
    params: RadarParameters,
    scan: ScanConfig,
    controller: BankController<D>,
    modes: ModeStateMachine<I>,
    position: P,
    sink: S,
    toolkit: StandardToolkit,
    demux: ChannelDemux,
    channels: ChannelSet,
    spectral: SpectralEstimator,
    pulse_pair: PulsePairEstimator,
    tx_power: TxPowerMonitor,
    aggregator: RayAggregator,
    observables: ObservableSet,
    time_series: bool,
    position_poll: Duration,
    ray_number: u64,
    rays_discarded: u64,
    logger: LogManager,
}

impl<D, I, P, S> RayRecorder<D, I, P, S>
where
    D: AcquisitionDevice,
    I: DigitalIo,
    P: PositionSource,
    S: RaySink,
{
    /// Validates the parameters and allocates every working buffer up front;
    /// nothing is allocated once the loop is running.
    pub fn new(
        mut params: RadarParameters,
        scan: ScanConfig,
        device: D,
        io: I,
        position: P,
        sink: S,
    ) -> CoreResult<Self> {
        params.validate()?;
        let gates = params.samples_per_pulse;
        let nfft = params.nfft();

        let demux = ChannelDemux::new(&params);
        let channels = demux.allocate()?;
        let mut spectral = SpectralEstimator::new(&params);
        spectral.initialize(gates, nfft)?;
        let mut pulse_pair = PulsePairEstimator::new(&params);
        pulse_pair.initialize(gates, nfft)?;
        let aggregator = RayAggregator::new(&params)?;
        let observables = ObservableSet::new(gates)?;
        let controller = BankController::new(device, &params)?;
        let modes = ModeStateMachine::new(&params, io);

        let logger = LogManager::new("run");
        logger.record(&format!(
            "{} gates, {} pulses per cycle, {}-point spectra, {:?} scan",
            gates, params.pulses_per_cycle, nfft, scan.kind
        ));

        Ok(Self {
            params,
            scan,
            controller,
            modes,
            position,
            sink,
            toolkit: StandardToolkit,
            demux,
            channels,
            spectral,
            pulse_pair,
            tx_power: TxPowerMonitor::default(),
            aggregator,
            observables,
            time_series: false,
            position_poll: Duration::from_millis(50),
            ray_number: 0,
            rays_discarded: 0,
            logger,
        })
    }

    /// Hands every demultiplexed spectrum to the sink as well.
    pub fn with_time_series(mut self, enabled: bool) -> Self {
        self.time_series = enabled;
        self
    }

    /// Interval between position reads while waiting for the scan sector.
    pub fn with_position_poll(mut self, poll: Duration) -> Self {
        self.position_poll = poll;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Records rays until the scan completes, the run is cancelled, the UTC
    /// day changes or the ray limit is reached. Device errors are fatal;
    /// transfer timeouts are not.
    pub fn run(&mut self, ctx: &RunContext) -> CoreResult<RunSummary> {
        self.modes.configure();
        wait_scan_start(
            &self.scan,
            &mut self.position,
            ctx.cancellation(),
            self.position_poll,
        )?;

        let outcome = if ctx.is_cancelled() {
            Ok(StopReason::Cancelled)
        } else {
            self.controller.prime().and_then(|()| self.ray_loop(ctx))
        };
        self.controller.close();
        let flushed = self.sink.flush();
        let stop = outcome?;
        flushed?;

        let summary = RunSummary {
            rays_written: self.ray_number,
            rays_discarded: self.rays_discarded,
            hardware_faults: self.controller.faults(),
            stop,
        };
        self.logger.record(&format!(
            "run ended ({:?}): {} rays written, {} discarded, {} hardware faults",
            summary.stop, summary.rays_written, summary.rays_discarded, summary.hardware_faults
        ));
        Ok(summary)
    }

    fn ray_loop(&mut self, ctx: &RunContext) -> CoreResult<StopReason> {
        let started = ctx.now();
        let mut schedules: Vec<SpectraSchedule> = [
            (SpectraKind::Normal, self.params.dump_spectra_secs),
            (SpectraKind::Rapid, self.params.dump_spectra_rapid_secs),
        ]
        .into_iter()
        .filter_map(|(kind, secs)| SpectraSchedule::new(kind, secs, started))
        .collect();
        let mut position = self.position.read()?;

        loop {
            if ctx.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            if let Some(slot) = self.modes.take_pending() {
                let modes = &mut self.modes;
                let status = self.controller.cycle_with(|| modes.apply(slot))?;
                note_cycle(ctx, status);
                ctx.metrics().record_mode_switch();
            }
            self.modes.begin_ray();

            if !self.record_ray(ctx, &mut schedules, position)? {
                return Ok(StopReason::Cancelled);
            }
            if ctx.day_changed() {
                self.logger.record("new day rollover detected");
                return Ok(StopReason::DayChanged);
            }
            if ctx.max_rays().is_some_and(|max| self.ray_number >= max) {
                return Ok(StopReason::RayLimit);
            }

            position = match self.position.read() {
                Ok(latest) => latest,
                Err(err) => {
                    self.logger
                        .warn(&format!("keeping last antenna position: {}", err));
                    position
                }
            };
            let elapsed = (ctx.now() - started).to_std().unwrap_or_default();
            let complete = self.scan.is_complete(&position, elapsed);
            self.modes.end_ray();
            if complete {
                return Ok(StopReason::ScanComplete);
            }
        }
    }

    /// Returns `false` when cancellation interrupted the ray, which is then
    /// dropped without being written.
    fn record_ray(
        &mut self,
        ctx: &RunContext,
        schedules: &mut [SpectraSchedule],
        position: AntennaPosition,
    ) -> CoreResult<bool> {
        let mode = *self.modes.current();
        let start = ctx.now();
        let faults_before = self.controller.faults();
        self.observables.zero();
        self.aggregator.reset();
        self.pulse_pair.reset();
        self.tx_power.reset();

        let mut polarity = Polarity::default();
        for _ in 0..self.params.moments_averaged {
            self.spectral.reset();
            let status = self.controller.cycle()?;
            note_cycle(ctx, status);
            let now = ctx.now();
            let due: Vec<usize> = (0..schedules.len())
                .filter(|&i| schedules[i].due(now))
                .collect();

            polarity = self.process_bank(&mode)?;

            if !ctx.is_cancelled() {
                for index in due {
                    self.write_snapshot(ctx, schedules[index].kind(), position)?;
                    schedules[index].advance();
                }
            }
            let summary = self.spectral.extract_moments(mode.mode, &self.toolkit);
            self.aggregator.accumulate(&summary, mode.mode);
            if ctx.is_cancelled() {
                break;
            }
        }

        if ctx.is_cancelled() {
            self.rays_discarded += 1;
            ctx.metrics().record_discarded_ray();
            self.logger
                .record(&format!("cancelled during ray {}, discarding it", self.ray_number));
            return Ok(false);
        }

        self.aggregator.finalize(
            self.pulse_pair.sums(),
            self.tx_power.reading(),
            &mode,
            &mut self.observables,
        );
        let header = RayHeader {
            ray_number: self.ray_number,
            slot: mode.slot,
            mode: mode.mode,
            polarity,
            start,
            end: ctx.now(),
            position,
            hardware_faults: self.controller.faults() - faults_before,
        };
        self.sink.write_ray(&header, &self.observables)?;
        ctx.metrics().record_ray();
        self.logger.record(&format!(
            "ray {} written ({:?}, {:?}, az {:.2} el {:.2})",
            header.ray_number,
            header.mode,
            header.polarity,
            position.azimuth_deg,
            position.elevation_deg
        ));
        self.ray_number += 1;
        Ok(true)
    }

    /// Runs every spectrum of the drained bank through the estimators and
    /// returns the polarity read from its first spectrum.
    fn process_bank(&mut self, mode: &ModeContext) -> CoreResult<Polarity> {
        let bank = self.controller.draining();
        let spectra = self
            .demux
            .spectra_in(bank)
            .min(self.params.spectra_averaged);
        if spectra < self.params.spectra_averaged {
            self.logger.warn(&format!(
                "bank holds {} of {} spectra",
                spectra, self.params.spectra_averaged
            ));
        }

        let mut polarity = Polarity::default();
        for spectrum in 0..spectra {
            self.demux.demux(bank, spectrum, &mut self.channels)?;
            if spectrum == 0 {
                polarity = self.channels.resolve_polarity();
                self.logger.debug(&format!("polarity {:?}", polarity));
            }
            let input = StageInput {
                channels: &self.channels,
                mode,
                polarity,
            };
            self.tx_power.add(&self.channels, polarity, mode.gate_offset);
            self.spectral.execute(input)?;
            self.pulse_pair.execute(input)?;
            if self.time_series {
                let truncated = self
                    .channels
                    .truncated(self.params.time_series_gate_count());
                self.sink
                    .write_time_series(self.ray_number, spectrum, &truncated)?;
            }
        }
        Ok(polarity)
    }

    fn write_snapshot(
        &mut self,
        ctx: &RunContext,
        kind: SpectraKind,
        position: AntennaPosition,
    ) -> CoreResult<()> {
        let Some(table) = self.spectral.table() else {
            return Ok(());
        };
        let header = SpectraHeader {
            kind,
            ray_number: self.ray_number,
            time: ctx.now(),
            position,
        };
        self.sink.write_spectra(&header, table)?;
        ctx.metrics().record_spectra_snapshot();
        self.logger.debug(&format!("{:?} spectra written", kind));
        Ok(())
    }
}

fn note_cycle(ctx: &RunContext, status: TransferStatus) {
    ctx.metrics().record_cycle();
    if !status.is_complete() {
        ctx.metrics().record_hardware_fault();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::dio::NullDigitalIo;
    use crate::acquisition::hardware::{AcquisitionSetup, BankIndex, Completion, SampleBank};
    use crate::acquisition::position::{Clock, FixedPosition, SystemClock};
    use crate::prelude::CoreError;
    use crate::processing::mode::{ModeSlot, PulseMode};
    use crate::processing::pulse_pair::tests::moving_target;
    use crate::processing::spectral::PsdTable;
    use crate::products::observables::Observable;
    use crate::run::context::CancellationToken;
    use crate::run::scan::ScanKind;
    use crate::telemetry::metrics::MetricsRecorder;
    use approx::assert_abs_diff_eq;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Digitiser that copies a fixed multiplexed bank on every good transfer.
    struct TemplateDevice {
        template: Vec<u16>,
        outstanding: Option<(BankIndex, SampleBank)>,
        statuses: VecDeque<TransferStatus>,
    }

    impl TemplateDevice {
        fn new(template: Vec<u16>) -> Self {
            Self {
                template,
                outstanding: None,
                statuses: VecDeque::new(),
            }
        }
    }

    impl AcquisitionDevice for TemplateDevice {
        fn init(&mut self, setup: &AcquisitionSetup) -> CoreResult<()> {
            if setup.bank_len() != self.template.len() {
                return Err(CoreError::Device("template does not fit the bank".into()));
            }
            Ok(())
        }

        fn start(&mut self, index: BankIndex, bank: SampleBank) -> CoreResult<()> {
            self.outstanding = Some((index, bank));
            Ok(())
        }

        fn wait_complete(&mut self) -> CoreResult<Completion> {
            let (index, mut bank) = self
                .outstanding
                .take()
                .ok_or_else(|| CoreError::Device("idle".into()))?;
            let status = self.statuses.pop_front().unwrap_or(TransferStatus::Complete);
            if status.is_complete() {
                bank.copy_from_slice(&self.template);
            }
            Ok(Completion {
                index,
                status,
                bank,
            })
        }

        fn close(&mut self) {}
    }

    #[derive(Default)]
    struct MemorySink {
        rays: Vec<(RayHeader, ObservableSet)>,
        spectra: Vec<(SpectraKind, usize)>,
        time_series: Vec<(u64, usize, usize)>,
        cancel_on_time_series: Option<CancellationToken>,
        flushed: bool,
    }

    impl RaySink for MemorySink {
        fn write_ray(&mut self, header: &RayHeader, observables: &ObservableSet) -> CoreResult<()> {
            self.rays.push((header.clone(), observables.clone()));
            Ok(())
        }

        fn write_spectra(&mut self, header: &SpectraHeader, table: &PsdTable) -> CoreResult<()> {
            self.spectra.push((header.kind, table.npsd()));
            Ok(())
        }

        fn write_time_series(
            &mut self,
            ray_number: u64,
            spectrum: usize,
            channels: &ChannelSet,
        ) -> CoreResult<()> {
            self.time_series.push((ray_number, spectrum, channels.gates()));
            if let Some(token) = &self.cancel_on_time_series {
                token.cancel();
            }
            Ok(())
        }

        fn flush(&mut self) -> CoreResult<()> {
            self.flushed = true;
            Ok(())
        }
    }

    /// Advances one second every time it is read.
    struct SteppingClock(Mutex<DateTime<Utc>>);

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::seconds(1);
            *now
        }
    }

    fn params() -> RadarParameters {
        RadarParameters {
            pulses_per_cycle: 64,
            samples_per_pulse: 120,
            pulse_offset_us: 20.0,
            spectra_averaged: 2,
            mode0: PulseMode::DoubleHvVh,
            ..Default::default()
        }
    }

    /// Whole turns across each pair series; see the pulse-pair tests.
    fn test_velocity(p: &RadarParameters) -> f64 {
        4.0 * p.wavelength_m() / (4.0 * 32.0 * p.prt_secs() / 2.0)
    }

    fn target_bank(p: &RadarParameters, velocity: f64) -> Vec<u16> {
        let set = moving_target(p, velocity, 0.3, 900.0);
        let demux = ChannelDemux::new(p);
        let mut bank = vec![0u16; p.bank_len()];
        for spectrum in 0..p.spectra_averaged {
            demux.multiplex(&set, spectrum, &mut bank).unwrap();
        }
        bank
    }

    fn context(cancel: CancellationToken, max_rays: Option<u64>) -> RunContext {
        RunContext::new(cancel, Arc::new(MetricsRecorder::new()), Arc::new(SystemClock))
            .with_max_rays(max_rays)
    }

    fn fixed_scan(kind: ScanKind) -> ScanConfig {
        ScanConfig {
            kind,
            ..Default::default()
        }
    }

    type TestRecorder =
        RayRecorder<TemplateDevice, NullDigitalIo, FixedPosition<SystemClock>, MemorySink>;

    fn recorder(p: RadarParameters, scan: ScanConfig, device: TemplateDevice) -> TestRecorder {
        RayRecorder::new(
            p,
            scan,
            device,
            NullDigitalIo,
            FixedPosition::new(180.0, 2.0, SystemClock),
            MemorySink::default(),
        )
        .unwrap()
    }

    #[test]
    fn synthetic_target_velocity_survives_the_ray_loop() {
        let p = params();
        let velocity = test_velocity(&p);
        let device = TemplateDevice::new(target_bank(&p, velocity));
        let mut rec = recorder(p, fixed_scan(ScanKind::Single), device);
        let ctx = context(CancellationToken::new(), None);

        let summary = rec.run(&ctx).unwrap();
        assert_eq!(summary.stop, StopReason::ScanComplete);
        assert_eq!(summary.rays_written, 1);

        let sink = rec.into_sink();
        assert!(sink.flushed);
        let (header, observables) = &sink.rays[0];
        assert_eq!(header.mode, PulseMode::DoubleHvVh);
        assert_eq!(header.polarity, Polarity::HorizontalFirst);
        assert_eq!(header.position.azimuth_deg, 180.0);
        let v = velocity as f32;
        assert_abs_diff_eq!(observables.get(Observable::VelVd)[0], v, epsilon = 0.2);
        assert_abs_diff_eq!(observables.get(Observable::VelFd)[0], v, epsilon = 0.1);
        assert_abs_diff_eq!(observables.get(Observable::VelFd)[110], v, epsilon = 0.1);
    }

    #[test]
    fn failed_transfer_does_not_stop_the_run() {
        let p = params();
        let mut device = TemplateDevice::new(target_bank(&p, 1.0));
        device.statuses = VecDeque::from(vec![TransferStatus::Complete, TransferStatus::Timeout]);
        let mut rec = recorder(p, fixed_scan(ScanKind::Fix), device);
        let ctx = context(CancellationToken::new(), Some(3));

        let summary = rec.run(&ctx).unwrap();
        assert_eq!(summary.stop, StopReason::RayLimit);
        assert_eq!(summary.rays_written, 3);
        assert_eq!(summary.hardware_faults, 1);
        let faults: Vec<u64> = rec.sink().rays.iter().map(|r| r.0.hardware_faults).collect();
        assert_eq!(faults, vec![0, 1, 0]);
        let metrics = ctx.metrics().snapshot();
        assert_eq!(metrics.cycles, 3);
        assert_eq!(metrics.hardware_faults, 1);
    }

    #[test]
    fn alternating_modes_switch_between_rays() {
        let p = RadarParameters {
            alternate_modes: true,
            mode1: PulseMode::SingleHV,
            nrays_mode0: 1,
            nrays_mode1: 1,
            ..params()
        };
        let device = TemplateDevice::new(target_bank(&p, 1.0));
        let mut rec = recorder(p, fixed_scan(ScanKind::Fix), device);
        let ctx = context(CancellationToken::new(), Some(4));

        rec.run(&ctx).unwrap();
        let slots: Vec<ModeSlot> = rec.sink().rays.iter().map(|r| r.0.slot).collect();
        assert_eq!(
            slots,
            vec![ModeSlot::Mode0, ModeSlot::Mode1, ModeSlot::Mode0, ModeSlot::Mode1]
        );
        let metrics = ctx.metrics().snapshot();
        assert_eq!(metrics.mode_switches, 3);
        // Each switch spends one cycle whose bank is dropped.
        assert_eq!(metrics.cycles, 4 + 3);
    }

    #[test]
    fn cancellation_mid_ray_discards_it() {
        let p = params();
        let device = TemplateDevice::new(target_bank(&p, 1.0));
        let cancel = CancellationToken::new();
        let mut rec = recorder(p, fixed_scan(ScanKind::Fix), device).with_time_series(true);
        rec.sink.cancel_on_time_series = Some(cancel.clone());
        let ctx = context(cancel, None);

        let summary = rec.run(&ctx).unwrap();
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(summary.rays_written, 0);
        assert_eq!(summary.rays_discarded, 1);
        assert!(rec.sink().rays.is_empty());
        assert!(rec.sink().flushed);
    }

    #[test]
    fn cancelled_before_start_acquires_nothing() {
        let p = params();
        let device = TemplateDevice::new(target_bank(&p, 1.0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rec = recorder(p, fixed_scan(ScanKind::Fix), device);
        let ctx = context(cancel, None);
        let summary = rec.run(&ctx).unwrap();
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(ctx.metrics().snapshot().cycles, 0);
    }

    #[test]
    fn snapshots_and_time_series_reach_the_sink() {
        let p = RadarParameters {
            dump_spectra_secs: 1,
            time_series_gates: Some(30),
            ..params()
        };
        let npsd = p.npsd();
        let device = TemplateDevice::new(target_bank(&p, 1.0));
        let mut rec = recorder(p, fixed_scan(ScanKind::Fix), device).with_time_series(true);
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(SteppingClock(Mutex::new(start)));
        let ctx = RunContext::new(CancellationToken::new(), Arc::new(MetricsRecorder::new()), clock)
            .with_max_rays(Some(2));

        rec.run(&ctx).unwrap();
        let sink = rec.sink();
        assert_eq!(sink.rays.len(), 2);
        assert!(!sink.spectra.is_empty());
        assert!(sink.spectra.iter().all(|&(kind, n)| kind == SpectraKind::Normal && n == npsd));
        assert_eq!(sink.time_series.len(), 2 * 2);
        assert!(sink.time_series.iter().all(|&(_, _, gates)| gates == 30));
        assert_eq!(sink.time_series[3].0, 1);
    }

    #[test]
    fn day_rollover_ends_the_run() {
        let p = params();
        let device = TemplateDevice::new(target_bank(&p, 1.0));
        let mut rec = recorder(p, fixed_scan(ScanKind::Track), device);
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 57).unwrap();
        let clock = Arc::new(SteppingClock(Mutex::new(start)));
        let ctx = RunContext::new(CancellationToken::new(), Arc::new(MetricsRecorder::new()), clock);

        let summary = rec.run(&ctx).unwrap();
        assert_eq!(summary.stop, StopReason::DayChanged);
        assert!(summary.rays_written >= 1);
    }
}
