use log::{debug, info, warn};

/// Thin wrapper that tags every message with the component that emitted it,
/// so `RUST_LOG=galileo::mode=debug` style filters select one stage.
#[derive(Debug, Clone)]
pub struct LogManager {
    target: String,
}

impl LogManager {
    pub fn new(component: &str) -> Self {
        Self {
            target: format!("galileo::{}", component),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn record(&self, message: &str) {
        info!(target: self.target.as_str(), "{}", message);
    }

    pub fn debug(&self, message: &str) {
        debug!(target: self.target.as_str(), "{}", message);
    }

    pub fn warn(&self, message: &str) {
        warn!(target: self.target.as_str(), "{}", message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new("core")
    }
}
