use crate::gui_bridge::bridge::{QuicklookBridge, QuicklookSink};
use crate::hardware::sim::{ScanningAntenna, SimulatedDigitiser, SimulatedDio};
use crate::output::jsonl::JsonLinesSink;
use crate::workflow::config::{RecorderConfig, TimeSeriesFormat};
use anyhow::Context;
use chrono::{DateTime, Utc};
use galileocore::acquisition::{FixedPosition, PositionSource, SystemClock};
use galileocore::params::RadarParameters;
use galileocore::products::RaySink;
use galileocore::run::{CancellationToken, RayRecorder, RunContext, RunSummary, ScanConfig};
use log::{info, warn};
use serde::Serialize;
use std::thread;
use tokio::runtime::Builder;
use tokio::signal;

/// First line of every ray file.
#[derive(Serialize)]
struct RunMetadata<'a> {
    file_stem: &'a str,
    started: DateTime<Utc>,
    operator: Option<&'a str>,
    scan: &'a ScanConfig,
    radar: &'a RadarParameters,
    ranges_m: Vec<f32>,
}

pub struct Runner {
    config: RecorderConfig,
}

impl Runner {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config }
    }

    #[cfg(test)]
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Wires the simulated hardware to the file sink and records until the
    /// scan ends, the day rolls over or `ctx` is cancelled.
    pub fn execute(
        &self,
        ctx: &RunContext,
        bridge: Option<&QuicklookBridge>,
    ) -> anyhow::Result<RunSummary> {
        let cfg = &self.config;
        let params = cfg.radar.clone();

        let position: Box<dyn PositionSource> = if cfg.scan.position_tracking {
            Box::new(ScanningAntenna::new(
                &cfg.scan,
                cfg.simulation.scan_rate_dps,
                SystemClock,
            ))
        } else {
            let (azimuth, elevation) = cfg.scan.fixed_pointing();
            Box::new(FixedPosition::new(azimuth, elevation, SystemClock))
        };

        let stem = cfg.file_stem();
        let metadata = RunMetadata {
            file_stem: &stem,
            started: ctx.now(),
            operator: cfg.scan.operator.as_deref(),
            scan: &cfg.scan,
            radar: &params,
            ranges_m: params.ranges_m(),
        };
        let files = JsonLinesSink::create(
            &cfg.output.directory,
            &stem,
            cfg.recorded.clone(),
            cfg.output.time_series,
            &params,
            &metadata,
        )
        .context("opening output files")?;
        let sink: Box<dyn RaySink> = match bridge {
            Some(bridge) => Box::new(QuicklookSink::new(files, bridge.clone())),
            None => Box::new(files),
        };

        let device = SimulatedDigitiser::new(&params, &cfg.simulation);
        let mut recorder = RayRecorder::new(
            params,
            cfg.scan.clone(),
            device,
            SimulatedDio::default(),
            position,
            sink,
        )
        .context("setting up ray recorder")?
        .with_time_series(cfg.output.time_series != TimeSeriesFormat::Off);

        let summary = recorder.run(ctx).context("recording rays")?;
        info!(
            "{} rays written, {} discarded, {} hardware faults, stopped: {:?}",
            summary.rays_written, summary.rays_discarded, summary.hardware_faults, summary.stop
        );
        Ok(summary)
    }
}

/// Cancels `token` on Ctrl+C. The current ray is abandoned and the run winds
/// down at the next check.
pub fn install_interrupt_handler(token: CancellationToken) -> anyhow::Result<()> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            runtime.block_on(async {
                match signal::ctrl_c().await {
                    Ok(()) => {
                        info!("interrupt received, stopping");
                        token.cancel();
                    }
                    Err(err) => warn!("cannot listen for Ctrl+C: {}", err),
                }
            });
        })
        .context("spawning interrupt thread")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::config::Overrides;
    use galileocore::run::{ScanKind, StopReason};
    use galileocore::telemetry::MetricsRecorder;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn config(directory: &std::path::Path) -> RecorderConfig {
        let mut cfg = RecorderConfig::default();
        cfg.radar.pulses_per_cycle = 16;
        cfg.radar.samples_per_pulse = 60;
        cfg.radar.spectra_averaged = 2;
        cfg.radar.moments_averaged = 1;
        cfg.radar.prf_hz = 20_000.0;
        cfg.output.directory = directory.to_path_buf();
        cfg.output.date = Some("20240301000000".into());
        cfg
    }

    fn context() -> RunContext {
        RunContext::new(
            CancellationToken::new(),
            Arc::new(MetricsRecorder::new()),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn single_scan_writes_one_ray() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.apply(&Overrides {
            scan: Some(crate::workflow::config::ScanOverride::Single {
                azimuth: 0.0,
                elevation: 90.0,
            }),
            time_series: Some(TimeSeriesFormat::Text),
            ts_samples: Some(20),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.scan.kind, ScanKind::Single);

        let runner = Runner::new(cfg);
        let summary = runner.execute(&context(), None).unwrap();
        assert_eq!(summary.rays_written, 1);
        assert_eq!(summary.stop, StopReason::ScanComplete);

        let stem = runner.config().file_stem();
        let rays = fs::read_to_string(dir.path().join(format!("{}.jsonl", stem))).unwrap();
        assert_eq!(rays.lines().count(), 2);
        assert!(rays.lines().next().unwrap().contains("\"file_stem\""));
        let samples = fs::read_to_string(dir.path().join(format!("{}_ts.txt", stem))).unwrap();
        assert!(samples.starts_with("npulse: 16\nnsample: 20\n"));
        assert_eq!(samples.matches("Ray_number:").count(), 2);
    }

    #[test]
    fn ray_limit_stops_open_ended_scan_despite_faults() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.simulation.fail_every = Some(3);
        let runner = Runner::new(cfg);
        let ctx = context().with_max_rays(Some(3));
        let bridge = QuicklookBridge::new(Arc::new(MetricsRecorder::new()));
        let summary = runner.execute(&ctx, Some(&bridge)).unwrap();
        assert_eq!(summary.rays_written, 3);
        assert_eq!(summary.stop, StopReason::RayLimit);
        assert!(summary.hardware_faults >= 1);
        assert_eq!(bridge.snapshot().ray.unwrap().ray_number, 2);
    }
}
