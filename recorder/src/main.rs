use anyhow::Context;
use clap::{ArgGroup, Parser};
use galileocore::acquisition::SystemClock;
use galileocore::prelude::CoreError;
use galileocore::run::{CancellationToken, RunContext};
use galileocore::telemetry::MetricsRecorder;
use gui_bridge::bridge::QuicklookBridge;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use workflow::config::{Overrides, RecorderConfig, ScanOverride, TimeSeriesFormat};
use workflow::runner::{install_interrupt_handler, Runner};

mod generator;
mod gui_bridge;
mod hardware;
mod output;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Galileo 94 GHz cloud radar recorder")]
#[command(group(ArgGroup::new("geometry").multiple(false)))]
#[command(group(ArgGroup::new("samples").multiple(false)))]
struct Args {
    /// Recorder configuration in YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Azimuth sweep between two angles
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true, group = "geometry")]
    ppi: Option<Vec<f32>>,
    /// Elevation sweep between two angles
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true, group = "geometry")]
    rhi: Option<Vec<f32>>,
    /// Slant-plane sweep bounded in elevation
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true, group = "geometry")]
    csp: Option<Vec<f32>>,
    /// Fixed pointing for a dwell time
    #[arg(long, num_args = 3, value_names = ["SECS", "AZ", "EL"], allow_negative_numbers = true, group = "geometry")]
    fix: Option<Vec<f64>>,
    /// Record a single ray
    #[arg(long, num_args = 2, value_names = ["AZ", "EL"], allow_negative_numbers = true, group = "geometry")]
    single: Option<Vec<f32>>,
    #[arg(long, num_args = 2, value_names = ["AZ", "EL"], allow_negative_numbers = true, group = "geometry")]
    track: Option<Vec<f32>>,
    #[arg(long, num_args = 2, value_names = ["AZ", "EL"], allow_negative_numbers = true, group = "geometry")]
    cal: Option<Vec<f32>>,
    /// Poll the antenna position for every ray
    #[arg(long)]
    position_msg: bool,
    #[arg(long)]
    long_pulse: bool,
    /// Alternate between mode0 and mode1
    #[arg(long)]
    alt_modes: bool,
    /// Pulse mode code 0-7
    #[arg(long)]
    mode0: Option<u8>,
    #[arg(long)]
    mode1: Option<u8>,
    #[arg(long)]
    nrays_mode0: Option<u32>,
    #[arg(long)]
    nrays_mode1: Option<u32>,
    /// Range window in km; only the far limit is honoured
    #[arg(long, num_args = 2, value_names = ["MIN_KM", "MAX_KM"])]
    range: Option<Vec<f64>>,
    /// Swap the H and V receiver channels
    #[arg(long)]
    swap: bool,
    /// Record time series as JSON lines
    #[arg(long, conflicts_with = "tsdump_txt")]
    tsdump: bool,
    /// Record time series as text
    #[arg(long)]
    tsdump_txt: bool,
    /// Gates in the time series (at least 20)
    #[arg(long, group = "samples")]
    tssamples: Option<usize>,
    /// Range covered by the time series, in km
    #[arg(long, group = "samples")]
    tsrange: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    scan_angle: Option<f32>,
    /// Antenna rate in degrees per second
    #[arg(long, allow_negative_numbers = true)]
    scan_velocity: Option<f32>,
    #[arg(long)]
    scan_number: Option<u32>,
    #[arg(long)]
    experiment_id: Option<u32>,
    /// Date tag used in file names
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    operator: Option<String>,
    /// Serve the latest ray over HTTP and keep serving after the run
    #[arg(long)]
    serve: bool,
    /// Stop after this many rays
    #[arg(long)]
    max_rays: Option<u64>,
    /// Output directory
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn scan_override(&self) -> Option<ScanOverride> {
        let pair = |values: &Option<Vec<f32>>| match values.as_deref() {
            Some(&[a, b]) => Some((a, b)),
            _ => None,
        };
        if let Some((min, max)) = pair(&self.ppi) {
            return Some(ScanOverride::Ppi { min, max });
        }
        if let Some((min, max)) = pair(&self.rhi) {
            return Some(ScanOverride::Rhi { min, max });
        }
        if let Some((min, max)) = pair(&self.csp) {
            return Some(ScanOverride::Csp { min, max });
        }
        if let Some(&[dwell_secs, azimuth, elevation]) = self.fix.as_deref() {
            return Some(ScanOverride::Fix {
                dwell_secs,
                azimuth: azimuth as f32,
                elevation: elevation as f32,
            });
        }
        if let Some((azimuth, elevation)) = pair(&self.single) {
            return Some(ScanOverride::Single { azimuth, elevation });
        }
        if let Some((azimuth, elevation)) = pair(&self.track) {
            return Some(ScanOverride::Track { azimuth, elevation });
        }
        pair(&self.cal).map(|(azimuth, elevation)| ScanOverride::Cal { azimuth, elevation })
    }

    fn overrides(&self) -> Overrides {
        let time_series = if self.tsdump_txt {
            Some(TimeSeriesFormat::Text)
        } else if self.tsdump {
            Some(TimeSeriesFormat::Jsonl)
        } else {
            None
        };
        Overrides {
            scan: self.scan_override(),
            position_tracking: self.position_msg,
            long_pulse: self.long_pulse,
            alternate_modes: self.alt_modes,
            mode0: self.mode0,
            mode1: self.mode1,
            nrays_mode0: self.nrays_mode0,
            nrays_mode1: self.nrays_mode1,
            range_km: match self.range.as_deref() {
                Some(&[min, max]) => Some((min, max)),
                _ => None,
            },
            swap: self.swap,
            time_series,
            ts_samples: self.tssamples,
            ts_range_km: self.tsrange,
            scan_angle: self.scan_angle,
            scan_velocity: self.scan_velocity,
            scan_number: self.scan_number,
            experiment_id: self.experiment_id,
            date: self.date.clone(),
            operator: self.operator.clone(),
            serve: self.serve,
            max_rays: self.max_rays,
            output: self.output.clone(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match record(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            match err.downcast_ref::<CoreError>() {
                Some(CoreError::Allocation { .. }) => ExitCode::from(3),
                _ => ExitCode::from(1),
            }
        }
    }
}

fn record(args: &Args) -> anyhow::Result<()> {
    let config = RecorderConfig::resolve(args.config.as_deref(), &args.overrides())?;
    info!(
        "{} by {}, {:?} pulses, {} gates",
        config.file_stem(),
        config.scan.operator.as_deref().unwrap_or("<unknown>"),
        config.radar.mode0,
        config.radar.samples_per_pulse
    );

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone())?;
    let metrics = Arc::new(MetricsRecorder::new());
    let ctx = RunContext::new(cancel.clone(), metrics.clone(), Arc::new(SystemClock))
        .with_max_rays(config.output.max_rays);

    let bridge = if config.output.serve {
        let bridge = QuicklookBridge::new(metrics);
        bridge
            .serve(config.output.bind)
            .context("starting quicklook endpoint")?;
        bridge.publish_status("recording");
        Some(bridge)
    } else {
        None
    };

    let runner = Runner::new(config);
    let summary = runner.execute(&ctx, bridge.as_ref())?;

    if let Some(bridge) = &bridge {
        bridge.publish_status(&format!(
            "finished after {} rays ({:?})",
            summary.rays_written, summary.stop
        ));
        if !cancel.is_cancelled() {
            info!("quicklook still serving, Ctrl+C to stop");
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
    Ok(())
}
