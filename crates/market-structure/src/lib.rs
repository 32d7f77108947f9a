pub mod alligator;
pub mod analyzer;
pub mod fibonacci;
pub mod wyckoff;
pub mod zones;

pub use alligator::*;
pub use analyzer::*;
pub use fibonacci::*;
pub use wyckoff::*;
pub use zones::*;

#[cfg(test)]
mod analyzer_tests;
