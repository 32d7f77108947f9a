pub mod aggregate;
pub mod ring;
pub mod store;

pub use aggregate::*;
pub use ring::*;
pub use store::*;
