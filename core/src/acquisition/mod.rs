pub mod controller;
pub mod dio;
pub mod hardware;
pub mod position;

pub use controller::BankController;
pub use dio::{DigitalIo, DioBank, NullDigitalIo};
pub use hardware::{AcquisitionDevice, AcquisitionSetup, BankIndex, Completion, SampleBank, TransferStatus};
pub use position::{AntennaPosition, Clock, FixedPosition, PositionSource, SystemClock};
