use crate::processing::demux::{ChannelSet, Polarity};
use crate::processing::mode::ModeContext;

/// Errors raised by the acquisition and estimation core.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("hardware transfer timed out")]
    HardwareTimeout,
    #[error("acquisition device failure: {0}")]
    Device(String),
    #[error("cannot allocate {elements} elements for {what}")]
    Allocation { what: &'static str, elements: usize },
    #[error("inconsistent configuration: {0}")]
    Configuration(String),
    #[error("persistence failure: {0}")]
    Sink(String),
    #[error("antenna position unavailable: {0}")]
    Position(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Everything an estimator needs to consume one demultiplexed spectrum cycle.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub channels: &'a ChannelSet,
    pub mode: &'a ModeContext,
    pub polarity: Polarity,
}

/// Estimator stages that accumulate over spectrum cycles.
///
/// `initialize` sizes the working buffers once per run, `execute` folds one
/// cycle into the running sums and `reset` zeroes them at the boundary the
/// owning loop chooses (moments-iteration for spectra, ray for pulse pairs).
pub trait ProcessingStage {
    fn initialize(&mut self, gates: usize, nfft: usize) -> CoreResult<()>;
    fn execute(&mut self, input: StageInput<'_>) -> CoreResult<()>;
    fn reset(&mut self);
}
