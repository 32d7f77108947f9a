pub mod composer;
pub mod confluence;
pub mod levels;

pub use composer::*;
pub use confluence::*;
pub use levels::*;
