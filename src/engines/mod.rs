//! The three engines that own domain behavior above the pure-logic
//! modules: acquisition (poll), upload (drain/compress/seal/post), and
//! FOTA (check/download/verify/commit/rollback). Each engine's entry
//! point runs to completion and never leaves the supervisor mid-task
//! (§4.13, §7 "Propagation policy").

pub mod acquisition;
pub mod fota;
pub mod upload;

pub use acquisition::AcquisitionEngine;
pub use fota::{FotaEngine, FotaStatus};
pub use upload::UploadEngine;
