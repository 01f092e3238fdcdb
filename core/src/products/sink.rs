//! Persistence seam.
//!
//! The ray loop hands finished rays, PSD snapshots and raw channel cycles to
//! a [`RaySink`]. Sinks own the byte layout; the core only guarantees the
//! shapes of what it passes in.

use crate::acquisition::position::AntennaPosition;
use crate::prelude::CoreResult;
use crate::processing::demux::ChannelSet;
use crate::processing::spectral::PsdTable;
use crate::products::observables::{ObservableSet, RayHeader};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectraKind {
    Normal,
    Rapid,
}

/// Metadata stamped on a PSD snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpectraHeader {
    pub kind: SpectraKind,
    pub ray_number: u64,
    pub time: DateTime<Utc>,
    pub position: AntennaPosition,
}

pub trait RaySink {
    /// Persists one finished ray. Called once per ray, never for a ray that
    /// was interrupted by cancellation.
    fn write_ray(&mut self, header: &RayHeader, observables: &ObservableSet) -> CoreResult<()>;

    /// Persists the accumulated PSD table of one moments-iteration, before
    /// clutter interpolation.
    fn write_spectra(&mut self, _header: &SpectraHeader, _table: &PsdTable) -> CoreResult<()> {
        Ok(())
    }

    /// Persists one demultiplexed spectrum cycle, already truncated to the
    /// time-series gate count.
    fn write_time_series(
        &mut self,
        _ray_number: u64,
        _spectrum: usize,
        _channels: &ChannelSet,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

impl<T: RaySink + ?Sized> RaySink for Box<T> {
    fn write_ray(&mut self, header: &RayHeader, observables: &ObservableSet) -> CoreResult<()> {
        (**self).write_ray(header, observables)
    }

    fn write_spectra(&mut self, header: &SpectraHeader, table: &PsdTable) -> CoreResult<()> {
        (**self).write_spectra(header, table)
    }

    fn write_time_series(
        &mut self,
        ray_number: u64,
        spectrum: usize,
        channels: &ChannelSet,
    ) -> CoreResult<()> {
        (**self).write_time_series(ray_number, spectrum, channels)
    }

    fn flush(&mut self) -> CoreResult<()> {
        (**self).flush()
    }
}

/// Wall-clock cadence of one kind of PSD snapshot.
///
/// The first snapshot lands on the next whole multiple of the interval after
/// start-up; each write then moves the deadline on by exactly one interval,
/// so a slow ray causes catch-up writes rather than drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectraSchedule {
    kind: SpectraKind,
    interval: i64,
    next: i64,
}

impl SpectraSchedule {
    /// `None` when the interval is zero (snapshots disabled).
    pub fn new(kind: SpectraKind, interval_secs: u64, now: DateTime<Utc>) -> Option<Self> {
        if interval_secs == 0 {
            return None;
        }
        let interval = interval_secs as i64;
        let next = interval * (now.timestamp().div_euclid(interval) + 1);
        Some(Self {
            kind,
            interval,
            next,
        })
    }

    pub fn kind(&self) -> SpectraKind {
        self.kind
    }

    /// Next deadline in Unix seconds.
    pub fn next(&self) -> i64 {
        self.next
    }

    pub fn due(&self, now: DateTime<Utc>) -> bool {
        self.next <= now.timestamp()
    }

    pub fn advance(&mut self) {
        self.next += self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn first_deadline_is_next_interval_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 7).unwrap();
        let schedule = SpectraSchedule::new(SpectraKind::Normal, 60, now).unwrap();
        assert_eq!(schedule.next(), now.timestamp() - 7 + 60);
        assert!(!schedule.due(now));
    }

    #[test]
    fn deadline_advances_by_one_interval() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut schedule = SpectraSchedule::new(SpectraKind::Rapid, 10, start).unwrap();
        let late = start + chrono::Duration::seconds(35);
        assert!(schedule.due(late));
        schedule.advance();
        assert!(schedule.due(late));
        schedule.advance();
        schedule.advance();
        assert!(!schedule.due(late));
        assert_eq!(schedule.next(), start.timestamp() + 40);
    }

    #[test]
    fn zero_interval_disables_snapshots() {
        assert!(SpectraSchedule::new(SpectraKind::Normal, 0, Utc::now()).is_none());
    }
}
