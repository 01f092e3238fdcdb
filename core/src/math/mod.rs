pub mod circular;
pub mod fft;
pub mod spectral;
pub mod stats;

pub use fft::FftHelper;
pub use spectral::{SpectralMoments, SpectralPeak, SpectralToolkit, StandardToolkit};
pub use stats::StatsHelper;
