//! Backup and restore agents: one sequential pass over the oid list per run.
//!
//! Pipes are created `readahead` oids ahead of the one being drained so the
//! next table's external process can connect while the current one streams.
//! The oid order must be the one the TOC was written in; byte ranges are
//! positional.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{HelperError, Oid, Result};
use crate::plugin::{PluginConfig, PluginProcess};

pub mod backup;
pub mod restore;
pub mod session;

pub use backup::{BackupOptions, run_backup};
pub use restore::{RestoreOptions, run_restore};
pub use session::{CancelFlag, Session};

/// Where the multiplexed stream lives: a local file or a plugin-managed path.
#[derive(Clone, Debug)]
pub enum DataLocation {
    File(PathBuf),
    Plugin {
        config: PluginConfig,
        data_path: PathBuf,
    },
}

impl DataLocation {
    pub fn is_plugin(&self) -> bool {
        matches!(self, DataLocation::Plugin { .. })
    }
}

fn check_oids(oids: &[Oid], readahead: usize) -> Result<()> {
    if readahead == 0 {
        return Err(HelperError::Config("readahead depth must be at least 1".into()));
    }
    let mut seen = HashSet::with_capacity(oids.len());
    for &oid in oids {
        if !seen.insert(oid) {
            return Err(HelperError::Config(format!("oid {oid} listed twice")));
        }
    }
    Ok(())
}

/// Prefer the plugin's account of a stream failure over the bare I/O error.
fn stream_error(
    err: std::io::Error,
    plugin: Option<&mut PluginProcess>,
    plugin_closed: bool,
) -> HelperError {
    match plugin.and_then(|p| p.explain(plugin_closed)) {
        Some(upstream) => upstream,
        None => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_readahead_and_duplicates() {
        assert!(check_oids(&[1, 2], 0).is_err());
        assert_eq!(check_oids(&[1, 2, 1], 1).unwrap_err().code(), "CONFIG");
        assert!(check_oids(&[], 3).is_ok());
    }
}
