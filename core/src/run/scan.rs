//! Scan geometry: when the recorder starts and stops taking rays.

use crate::acquisition::position::{AntennaPosition, PositionSource};
use crate::prelude::CoreResult;
use crate::run::context::CancellationToken;
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// Azimuth sweep between two angles.
    Ppi,
    /// Elevation sweep between two angles.
    Rhi,
    /// Slant-plane sweep, bounded in elevation.
    Csp,
    /// Fixed pointing, optionally for a limited dwell.
    #[default]
    Fix,
    /// One ray at a fixed pointing.
    Single,
    Track,
    Cal,
}

impl ScanKind {
    pub fn is_sweep(self) -> bool {
        matches!(self, ScanKind::Ppi | ScanKind::Rhi | ScanKind::Csp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub kind: ScanKind,
    /// Sector start for sweeps; pointing elevation for fixed geometries.
    pub min_angle_deg: f32,
    pub max_angle_deg: f32,
    /// Pointing azimuth for fixed geometries.
    pub scan_angle_deg: f32,
    pub dwell_secs: Option<f64>,
    pub scan_velocity_dps: Option<f32>,
    /// Pedestal azimuth reading that corresponds to true north.
    pub azimuth_offset_deg: f32,
    /// Poll the antenna position instead of stamping the configured pointing.
    pub position_tracking: bool,
    pub scan_number: u32,
    pub experiment_id: u32,
    pub operator: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            kind: ScanKind::Fix,
            min_angle_deg: 0.0,
            max_angle_deg: 0.0,
            scan_angle_deg: 0.0,
            dwell_secs: None,
            scan_velocity_dps: None,
            azimuth_offset_deg: 90.0,
            position_tracking: false,
            scan_number: 0,
            experiment_id: 0,
            operator: None,
        }
    }
}

impl ScanConfig {
    /// Moves the configured azimuths into the pedestal frame. Call once after
    /// loading.
    pub fn apply_azimuth_offset(&mut self) {
        if self.kind == ScanKind::Ppi {
            self.min_angle_deg -= self.azimuth_offset_deg;
            self.max_angle_deg -= self.azimuth_offset_deg;
        } else {
            self.scan_angle_deg -= self.azimuth_offset_deg;
        }
    }

    /// Azimuth and elevation stamped on rays when the position is not polled.
    pub fn fixed_pointing(&self) -> (f32, f32) {
        (self.scan_angle_deg, self.min_angle_deg)
    }

    /// Angle that bounds the sector, `None` for non-sweeping geometries.
    pub fn sector_angle(&self, position: &AntennaPosition) -> Option<f32> {
        match self.kind {
            ScanKind::Ppi => Some(position.azimuth_deg),
            ScanKind::Rhi | ScanKind::Csp => Some(position.elevation_deg),
            _ => None,
        }
    }

    fn inside(&self, angle: f32) -> bool {
        angle >= self.min_angle_deg && angle <= self.max_angle_deg
    }

    /// Tested at the start of each ray; that ray is still recorded and the
    /// loop stops before the next one.
    pub fn is_complete(&self, position: &AntennaPosition, elapsed: Duration) -> bool {
        match self.kind {
            ScanKind::Single => true,
            ScanKind::Fix => self
                .dwell_secs
                .is_some_and(|dwell| dwell > 0.0 && elapsed.as_secs_f64() >= dwell),
            ScanKind::Ppi | ScanKind::Rhi | ScanKind::Csp => {
                if !self.position_tracking {
                    return false;
                }
                self.sector_angle(position)
                    .is_some_and(|angle| !self.inside(angle))
            }
            ScanKind::Track | ScanKind::Cal => false,
        }
    }
}

/// Blocks a sweep until the antenna has left the sector and re-entered it,
/// so the first ray is taken at the sector edge. Returns the last position
/// read, or `None` when cancelled or the geometry does not sweep.
pub fn wait_scan_start<P: PositionSource + ?Sized>(
    scan: &ScanConfig,
    source: &mut P,
    cancel: &CancellationToken,
    poll: Duration,
) -> CoreResult<Option<AntennaPosition>> {
    if !scan.kind.is_sweep() || !scan.position_tracking {
        return Ok(None);
    }
    let logger = LogManager::new("run");

    logger.record("waiting to get outside scan range");
    let mut position = source.read()?;
    while scan.sector_angle(&position).is_some_and(|a| scan.inside(a)) {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        pause(poll);
        position = source.read()?;
    }

    logger.record(&format!(
        "waiting to get within scan range {:.1}..{:.1} deg",
        scan.min_angle_deg, scan.max_angle_deg
    ));
    while scan.sector_angle(&position).is_some_and(|a| !scan.inside(a)) {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        pause(poll);
        position = source.read()?;
    }
    Ok(Some(position))
}

fn pause(poll: Duration) {
    if !poll.is_zero() {
        std::thread::sleep(poll);
    }
}
