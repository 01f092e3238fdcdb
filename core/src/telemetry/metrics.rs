use serde::Serialize;
use std::sync::Mutex;

/// Run counters shared between the ray loop and the status endpoint.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub hardware_faults: u64,
    pub rays_written: u64,
    pub rays_discarded: u64,
    pub mode_switches: u64,
    pub spectra_snapshots: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_cycle(&self) {
        self.update(|m| m.cycles += 1);
    }

    pub fn record_hardware_fault(&self) {
        self.update(|m| m.hardware_faults += 1);
    }

    pub fn record_ray(&self) {
        self.update(|m| m.rays_written += 1);
    }

    pub fn record_discarded_ray(&self) {
        self.update(|m| m.rays_discarded += 1);
    }

    pub fn record_mode_switch(&self) {
        self.update(|m| m.mode_switches += 1);
    }

    pub fn record_spectra_snapshot(&self) {
        self.update(|m| m.spectra_snapshots += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|m| *m).unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
