use crate::hardware::sim::SimulationConfig;
use anyhow::{bail, Context};
use galileocore::params::RadarParameters;
use galileocore::processing::mode::PulseMode;
use galileocore::products::observables::RecordSelection;
use galileocore::run::scan::{ScanConfig, ScanKind};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Smallest gate count accepted for time-series recording.
pub const MIN_TIME_SERIES_GATES: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeSeriesFormat {
    #[default]
    Off,
    Jsonl,
    Text,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Tag used in file names, `YYYYmmddHHMMSS` of the start time by default.
    pub date: Option<String>,
    pub time_series: TimeSeriesFormat,
    pub max_rays: Option<u64>,
    pub serve: bool,
    pub bind: SocketAddr,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            date: None,
            time_series: TimeSeriesFormat::Off,
            max_rays: None,
            serve: false,
            bind: SocketAddr::from(([127, 0, 0, 1], 9000)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecorderConfig {
    pub radar: RadarParameters,
    pub scan: ScanConfig,
    pub output: OutputConfig,
    pub simulation: SimulationConfig,
    pub recorded: RecordSelection,
}

/// Scan geometry chosen on the command line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScanOverride {
    Ppi { min: f32, max: f32 },
    Rhi { min: f32, max: f32 },
    Csp { min: f32, max: f32 },
    Fix { dwell_secs: f64, azimuth: f32, elevation: f32 },
    Single { azimuth: f32, elevation: f32 },
    Track { azimuth: f32, elevation: f32 },
    Cal { azimuth: f32, elevation: f32 },
}

/// Command-line settings layered over the YAML file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub scan: Option<ScanOverride>,
    pub position_tracking: bool,
    pub long_pulse: bool,
    pub alternate_modes: bool,
    pub mode0: Option<u8>,
    pub mode1: Option<u8>,
    pub nrays_mode0: Option<u32>,
    pub nrays_mode1: Option<u32>,
    pub range_km: Option<(f64, f64)>,
    pub swap: bool,
    pub time_series: Option<TimeSeriesFormat>,
    pub ts_samples: Option<usize>,
    pub ts_range_km: Option<f64>,
    pub scan_angle: Option<f32>,
    pub scan_velocity: Option<f32>,
    pub scan_number: Option<u32>,
    pub experiment_id: Option<u32>,
    pub date: Option<String>,
    pub operator: Option<String>,
    pub serve: bool,
    pub max_rays: Option<u64>,
    pub output: Option<PathBuf>,
}

impl RecorderConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading recorder config {}", path_ref.display()))?;
        let config: RecorderConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing recorder config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Loads the file (or defaults), applies the command line, moves the
    /// azimuths into the pedestal frame and validates the radar settings.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides)?;
        config.scan.apply_azimuth_offset();
        config
            .radar
            .validate()
            .context("validating radar parameters")?;
        if config.scan.operator.is_none() {
            config.scan.operator = Some(default_operator());
        }
        if config.output.date.is_none() {
            config.output.date = Some(chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
        }
        Ok(config)
    }

    pub fn apply(&mut self, o: &Overrides) -> anyhow::Result<()> {
        if let Some(scan) = o.scan {
            self.apply_scan(scan);
        }
        let radar = &mut self.radar;
        radar.long_pulse_mode |= o.long_pulse;
        radar.alternate_modes |= o.alternate_modes;
        radar.swap_channels |= o.swap;
        if let Some(code) = o.mode0 {
            radar.mode0 = mode_from_code(code)?;
        }
        if let Some(code) = o.mode1 {
            radar.mode1 = mode_from_code(code)?;
        }
        if let Some(n) = o.nrays_mode0 {
            radar.nrays_mode0 = n;
        }
        if let Some(n) = o.nrays_mode1 {
            radar.nrays_mode1 = n;
        }
        if let Some((_, max_km)) = o.range_km {
            self.apply_range(max_km);
        }

        if let Some(format) = o.time_series {
            self.output.time_series = format;
        }
        if let Some(samples) = o.ts_samples {
            if samples < MIN_TIME_SERIES_GATES {
                bail!("invalid number of gates for time series recording: {}", samples);
            }
            self.radar.time_series_gates = Some(samples);
        }
        if let Some(km) = o.ts_range_km {
            let samples = (km * 1000.0 / self.radar.gate_width_m() + 0.5) as usize;
            if samples < MIN_TIME_SERIES_GATES {
                bail!("invalid range for time series recording: {} km", km);
            }
            self.radar.time_series_gates = Some(samples);
        }

        let scan = &mut self.scan;
        scan.position_tracking |= o.position_tracking;
        if let Some(angle) = o.scan_angle {
            scan.scan_angle_deg = angle;
        }
        if let Some(velocity) = o.scan_velocity {
            scan.scan_velocity_dps = Some(velocity);
        }
        if let Some(n) = o.scan_number {
            scan.scan_number = n;
        }
        if let Some(id) = o.experiment_id {
            scan.experiment_id = id;
        }
        if let Some(operator) = &o.operator {
            scan.operator = Some(operator.clone());
        }

        let output = &mut self.output;
        output.serve |= o.serve;
        if let Some(date) = &o.date {
            output.date = Some(date.clone());
        }
        if o.max_rays.is_some() {
            output.max_rays = o.max_rays;
        }
        if let Some(dir) = &o.output {
            output.directory = dir.clone();
        }
        Ok(())
    }

    fn apply_scan(&mut self, scan: ScanOverride) {
        let s = &mut self.scan;
        let fixed = |s: &mut ScanConfig, kind: ScanKind, azimuth: f32, elevation: f32| {
            s.kind = kind;
            s.scan_angle_deg = azimuth;
            s.min_angle_deg = elevation;
            s.max_angle_deg = elevation;
        };
        match scan {
            ScanOverride::Ppi { min, max } => {
                s.kind = ScanKind::Ppi;
                s.min_angle_deg = min;
                s.max_angle_deg = max;
            }
            ScanOverride::Rhi { min, max } => {
                s.kind = ScanKind::Rhi;
                s.min_angle_deg = min;
                s.max_angle_deg = max;
            }
            ScanOverride::Csp { min, max } => {
                s.kind = ScanKind::Csp;
                s.min_angle_deg = min;
                s.max_angle_deg = max;
            }
            ScanOverride::Fix {
                dwell_secs,
                azimuth,
                elevation,
            } => {
                fixed(s, ScanKind::Fix, azimuth, elevation);
                s.dwell_secs = Some(dwell_secs);
                s.scan_velocity_dps = Some(0.0);
            }
            ScanOverride::Single { azimuth, elevation } => {
                fixed(s, ScanKind::Single, azimuth, elevation);
                s.scan_velocity_dps = Some(0.0);
            }
            ScanOverride::Track { azimuth, elevation } => fixed(s, ScanKind::Track, azimuth, elevation),
            ScanOverride::Cal { azimuth, elevation } => fixed(s, ScanKind::Cal, azimuth, elevation),
        }
        info!("scan geometry {:?}", s.kind);
    }

    /// Only the far limit is honoured; the first gate is fixed by the
    /// configured delay.
    fn apply_range(&mut self, max_km: f64) {
        let radar = &mut self.radar;
        let gate_width = radar.gate_width_m();
        let min_gate = radar.first_gate() as usize;
        let mut max_gate = (max_km * 1000.0 / gate_width + 0.5) as usize;
        if max_gate <= min_gate {
            max_gate = min_gate + 1;
        }
        radar.delay_clocks = (min_gate as u32 - 1) * radar.clock_divfactor;
        radar.samples_per_pulse = max_gate - min_gate;
        info!(
            "range {:.3} to {:.3} km, {} gates",
            min_gate as f64 * gate_width / 1000.0,
            max_gate as f64 * gate_width / 1000.0,
            radar.samples_per_pulse
        );
    }

    /// Common stem of every output file.
    pub fn file_stem(&self) -> String {
        let kind = serde_yaml::to_string(&self.scan.kind)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "scan".into());
        format!(
            "radar-galileo_{}_{}",
            self.output.date.as_deref().unwrap_or("undated"),
            kind
        )
    }
}

fn mode_from_code(code: u8) -> anyhow::Result<PulseMode> {
    if code > 7 {
        bail!("pulse mode {} out of range 0-7", code);
    }
    Ok(PulseMode::from_code(code))
}

fn default_operator() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "<unknown>".into())
}
