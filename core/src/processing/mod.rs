pub mod aggregator;
pub mod buffers;
pub mod demux;
pub mod mode;
pub mod pulse_pair;
pub mod spectral;
pub mod tx_power;

pub use aggregator::{RayAggregator, UniformWeighting};
pub use demux::{ChannelDemux, ChannelSet, Polarity};
pub use mode::{ModeContext, ModeSlot, ModeStateMachine, PulseMode};
pub use pulse_pair::PulsePairEstimator;
pub use spectral::{PsdTable, SpectralEstimator};
pub use tx_power::TxPowerMonitor;
