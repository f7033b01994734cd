pub mod log_archive;
pub mod preview_manager;

pub use log_archive::LogArchive;
pub use preview_manager::{
    ExtendOutcome, PreviewInfo, PreviewManager, PreviewRequest, PreviewStarted, StopOutcome,
};
