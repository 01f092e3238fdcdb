pub mod observables;
pub mod sink;

pub use observables::{Observable, ObservableSet, RayHeader, RecordSelection};
pub use sink::{RaySink, SpectraHeader, SpectraKind, SpectraSchedule};
