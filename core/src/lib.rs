//! Acquisition and estimation core of the Galileo 94 GHz cloud radar recorder.
//!
//! Raw multiplexed samples arrive through a double-buffered acquisition
//! controller, are split into co- and cross-polar channels and reduced to
//! per-gate Doppler spectra and pulse-pair statistics, then averaged into one
//! set of calibrated observables per ray. Hardware, antenna position and
//! persistence are reached only through the traits in [`acquisition`] and
//! [`products::sink`].

pub mod acquisition;
pub mod math;
pub mod params;
pub mod prelude;
pub mod processing;
pub mod products;
pub mod run;
pub mod telemetry;

pub use params::{Calibration, RadarParameters, WindowKind};
pub use prelude::{CoreError, CoreResult, ProcessingStage, StageInput};
