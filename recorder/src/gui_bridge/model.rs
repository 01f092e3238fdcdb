use chrono::{DateTime, Utc};
use galileocore::processing::mode::{ModeSlot, PulseMode};
use galileocore::products::{Observable, ObservableSet, RayHeader};
use serde::Serialize;
use std::collections::BTreeMap;

/// Profiles shown on the quicklook page.
pub const QUICKLOOK_PROFILES: [Observable; 5] = [
    Observable::ZedHc,
    Observable::VelHc,
    Observable::ZdrC,
    Observable::LdrHc,
    Observable::VelVd,
];

#[derive(Debug, Clone, Serialize)]
pub struct RayView {
    pub ray_number: u64,
    pub slot: ModeSlot,
    pub mode: PulseMode,
    pub end: DateTime<Utc>,
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
    pub hardware_faults: u64,
    pub profiles: BTreeMap<&'static str, Vec<f32>>,
}

impl RayView {
    pub fn from_ray(header: &RayHeader, observables: &ObservableSet) -> Self {
        Self {
            ray_number: header.ray_number,
            slot: header.slot,
            mode: header.mode,
            end: header.end,
            azimuth_deg: header.position.azimuth_deg,
            elevation_deg: header.position.elevation_deg,
            hardware_faults: header.hardware_faults,
            profiles: QUICKLOOK_PROFILES
                .iter()
                .map(|&o| (o.name(), observables.get(o).to_vec()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct QuicklookModel {
    pub ray: Option<RayView>,
    pub status: String,
}
