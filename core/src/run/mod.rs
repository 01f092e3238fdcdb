pub mod context;
pub mod recorder;
pub mod scan;

pub use context::{CancellationToken, RunContext};
pub use recorder::{RayRecorder, RunSummary, StopReason};
pub use scan::{wait_scan_start, ScanConfig, ScanKind};
