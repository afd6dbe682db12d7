//! Configuration components, one per concern.

pub mod logging;
pub mod relay;
pub mod storage;
pub mod sync;

pub use logging::*;
pub use relay::*;
pub use storage::*;
pub use sync::*;
