use crate::prelude::CoreResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AntennaPosition {
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
    pub timestamp: DateTime<Utc>,
}

/// Wall-clock source, injectable so day rollover and spectra cadence can be
/// tested without waiting.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Pedestal position reader.
pub trait PositionSource {
    fn read(&mut self) -> CoreResult<AntennaPosition>;
}

impl<T: PositionSource + ?Sized> PositionSource for Box<T> {
    fn read(&mut self) -> CoreResult<AntennaPosition> {
        (**self).read()
    }
}

/// Used without a position message: the configured pointing stamped with the
/// system clock.
pub struct FixedPosition<C: Clock> {
    azimuth_deg: f32,
    elevation_deg: f32,
    clock: C,
}

impl<C: Clock> FixedPosition<C> {
    pub fn new(azimuth_deg: f32, elevation_deg: f32, clock: C) -> Self {
        Self {
            azimuth_deg,
            elevation_deg,
            clock,
        }
    }
}

impl<C: Clock> PositionSource for FixedPosition<C> {
    fn read(&mut self) -> CoreResult<AntennaPosition> {
        Ok(AntennaPosition {
            azimuth_deg: self.azimuth_deg,
            elevation_deg: self.elevation_deg,
            timestamp: self.clock.now(),
        })
    }
}
