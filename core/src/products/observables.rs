//! Ray-level science products.

use crate::acquisition::position::AntennaPosition;
use crate::prelude::{CoreError, CoreResult};
use crate::processing::buffers::zeroed;
use crate::processing::demux::Polarity;
use crate::processing::mode::{ModeSlot, PulseMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Observable {
    ZedHc,
    ZedXhc,
    ZedVc,
    ZedXvc,
    SnrHc,
    SnrXhc,
    SnrVc,
    SnrXvc,
    VelHc,
    VelVc,
    SpwHc,
    SpwVc,
    LdrHc,
    LdrVc,
    ZdrC,
    VelVd,
    VelFd,
    PhidpVd,
    PhidpFd,
    RhoVd,
    RhoFd,
    RhoVds,
    RhoFds,
    PowH,
    PowHx,
    PowV,
    PowVx,
    NpcH,
    NpcV,
    #[serde(rename = "TX_1A")]
    Tx1a,
    #[serde(rename = "TX_2A")]
    Tx2a,
    #[serde(rename = "TX_1B")]
    Tx1b,
    #[serde(rename = "TX_2B")]
    Tx2b,
}

impl Observable {
    pub const ALL: [Observable; 33] = [
        Observable::ZedHc,
        Observable::ZedXhc,
        Observable::ZedVc,
        Observable::ZedXvc,
        Observable::SnrHc,
        Observable::SnrXhc,
        Observable::SnrVc,
        Observable::SnrXvc,
        Observable::VelHc,
        Observable::VelVc,
        Observable::SpwHc,
        Observable::SpwVc,
        Observable::LdrHc,
        Observable::LdrVc,
        Observable::ZdrC,
        Observable::VelVd,
        Observable::VelFd,
        Observable::PhidpVd,
        Observable::PhidpFd,
        Observable::RhoVd,
        Observable::RhoFd,
        Observable::RhoVds,
        Observable::RhoFds,
        Observable::PowH,
        Observable::PowHx,
        Observable::PowV,
        Observable::PowVx,
        Observable::NpcH,
        Observable::NpcV,
        Observable::Tx1a,
        Observable::Tx2a,
        Observable::Tx1b,
        Observable::Tx2b,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Observable::ZedHc => "ZED_HC",
            Observable::ZedXhc => "ZED_XHC",
            Observable::ZedVc => "ZED_VC",
            Observable::ZedXvc => "ZED_XVC",
            Observable::SnrHc => "SNR_HC",
            Observable::SnrXhc => "SNR_XHC",
            Observable::SnrVc => "SNR_VC",
            Observable::SnrXvc => "SNR_XVC",
            Observable::VelHc => "VEL_HC",
            Observable::VelVc => "VEL_VC",
            Observable::SpwHc => "SPW_HC",
            Observable::SpwVc => "SPW_VC",
            Observable::LdrHc => "LDR_HC",
            Observable::LdrVc => "LDR_VC",
            Observable::ZdrC => "ZDR_C",
            Observable::VelVd => "VEL_VD",
            Observable::VelFd => "VEL_FD",
            Observable::PhidpVd => "PHIDP_VD",
            Observable::PhidpFd => "PHIDP_FD",
            Observable::RhoVd => "RHO_VD",
            Observable::RhoFd => "RHO_FD",
            Observable::RhoVds => "RHO_VDS",
            Observable::RhoFds => "RHO_FDS",
            Observable::PowH => "POW_H",
            Observable::PowHx => "POW_HX",
            Observable::PowV => "POW_V",
            Observable::PowVx => "POW_VX",
            Observable::NpcH => "NPC_H",
            Observable::NpcV => "NPC_V",
            Observable::Tx1a => "TX_1A",
            Observable::Tx2a => "TX_2A",
            Observable::Tx1b => "TX_1B",
            Observable::Tx2b => "TX_2B",
        }
    }

    /// Scalar observables hold a single value per ray.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            Observable::NpcH
                | Observable::NpcV
                | Observable::Tx1a
                | Observable::Tx2a
                | Observable::Tx1b
                | Observable::Tx2b
        )
    }

    pub fn units(self) -> &'static str {
        match self {
            Observable::ZedHc
            | Observable::ZedXhc
            | Observable::ZedVc
            | Observable::ZedXvc => "dBZ",
            Observable::SnrHc
            | Observable::SnrXhc
            | Observable::SnrVc
            | Observable::SnrXvc
            | Observable::LdrHc
            | Observable::LdrVc
            | Observable::ZdrC
            | Observable::PowH
            | Observable::PowHx
            | Observable::PowV
            | Observable::PowVx
            | Observable::NpcH
            | Observable::NpcV => "dB",
            Observable::VelHc
            | Observable::VelVc
            | Observable::SpwHc
            | Observable::SpwVc
            | Observable::VelVd
            | Observable::VelFd => "m s-1",
            Observable::PhidpVd | Observable::PhidpFd => "degree",
            Observable::RhoVd | Observable::RhoFd | Observable::RhoVds | Observable::RhoFds => "1",
            Observable::Tx1a | Observable::Tx2a | Observable::Tx1b | Observable::Tx2b => "mV",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Observable::ALL.into_iter().find(|o| o.name() == name)
    }
}

/// Fixed-length arrays for every observable, allocated once per run.
#[derive(Debug, Clone)]
pub struct ObservableSet {
    gates: usize,
    values: Vec<Vec<f32>>,
}

impl ObservableSet {
    pub fn new(gates: usize) -> CoreResult<Self> {
        let values = Observable::ALL
            .iter()
            .map(|o| zeroed(if o.is_scalar() { 1 } else { gates }, o.name()))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { gates, values })
    }

    pub fn gates(&self) -> usize {
        self.gates
    }

    pub fn get(&self, observable: Observable) -> &[f32] {
        &self.values[observable as usize]
    }

    pub fn get_mut(&mut self, observable: Observable) -> &mut [f32] {
        &mut self.values[observable as usize]
    }

    pub fn scalar(&self, observable: Observable) -> f32 {
        self.get(observable).first().copied().unwrap_or(f32::NAN)
    }

    pub fn set_scalar(&mut self, observable: Observable, value: f32) {
        if let Some(slot) = self.get_mut(observable).first_mut() {
            *slot = value;
        }
    }

    pub fn zero(&mut self) {
        for values in self.values.iter_mut() {
            values.iter_mut().for_each(|v| *v = 0.0);
        }
    }
}

/// Observables forwarded to the persistence collaborator. Everything is
/// always computed; this only filters what is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordSelection(BTreeSet<Observable>);

impl Default for RecordSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl RecordSelection {
    pub fn all() -> Self {
        Self(Observable::ALL.into_iter().collect())
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> CoreResult<Self> {
        names
            .into_iter()
            .map(|name| {
                Observable::from_name(name)
                    .ok_or_else(|| CoreError::Configuration(format!("unknown observable {}", name)))
            })
            .collect::<CoreResult<BTreeSet<_>>>()
            .map(Self)
    }

    pub fn contains(&self, observable: Observable) -> bool {
        self.0.contains(&observable)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn select<'a>(&self, set: &'a ObservableSet) -> BTreeMap<&'static str, &'a [f32]> {
        self.0.iter().map(|&o| (o.name(), set.get(o))).collect()
    }
}

/// Per-ray metadata written alongside the observables.
#[derive(Debug, Clone, Serialize)]
pub struct RayHeader {
    pub ray_number: u64,
    pub slot: ModeSlot,
    pub mode: PulseMode,
    pub polarity: Polarity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub position: AntennaPosition,
    pub hardware_faults: u64,
}
