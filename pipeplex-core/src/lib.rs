#![deny(unsafe_code)]

pub mod agent;
pub mod codec;
pub mod error;
pub mod oids;
pub mod pipe;
pub mod plugin;
pub mod toc;

// Re-exports: stable API surface
pub use agent::{
    BackupOptions, CancelFlag, DataLocation, RestoreOptions, Session, run_backup, run_restore,
};
pub use codec::{CodecId, Compression};
pub use error::{HelperError, Oid, Result};
pub use plugin::PluginConfig;
pub use toc::SegmentToc;
