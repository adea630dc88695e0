pub mod change;
pub mod error;
pub mod message;
pub mod version;
pub mod window;

pub use change::{BackendId, Change, ComparisonReport};
pub use error::CompareError;
pub use version::{ReleaseTag, ReleaseVersion};
pub use window::{ScanWindow, StopReason, WindowCheck};
