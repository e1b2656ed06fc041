//! dss-scanner - Polling ingestion of dropbox directories
//!
//! A [`DirectoryScanner`] lists a [`ScannedStore`], asks a
//! [`DirectoryScanningHandler`] what to do with each ready item and hands
//! the processable ones to an [`ItemHandler`]. [`FaultyPathTracker`] keeps
//! failing items from being retried until an operator clears them.

pub mod faulty;
pub mod handler;
pub mod scanner;
pub mod store;

pub use faulty::{FAULTY_PATH_FILENAME, FaultyPathTracker, ReprocessingHandler, read_faulty_file};
pub use handler::{
    CompositeHandler, DirectoryScanningHandler, HandleInstruction, ItemHandler,
    PassThroughHandler, Status,
};
pub use scanner::{DirectoryScanner, ScanSummary};
pub use store::{DirectoryStore, IS_FINISHED_PREFIX, ScannedStore, StoreItem};
