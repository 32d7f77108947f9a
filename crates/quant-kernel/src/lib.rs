pub mod cycles;
pub mod divergence;
pub mod garch;
pub mod hurst;
pub mod indicators;
pub mod rolling;
pub mod stationarity;

pub use cycles::*;
pub use divergence::*;
pub use garch::*;
pub use hurst::*;
pub use indicators::*;
pub use rolling::*;
pub use stationarity::*;
