//! Transient named pipes, one per oid, named `<base>_<oid>`.
//!
//! A pipe is created ahead of use, opened by the agent from one end and by an
//! external per-table process from the other, and unlinked once both sides are
//! done with it.

use std::collections::BTreeSet;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{HelperError, Oid, OidContext, Phase, Result};

const FIFO_MODE: libc::mode_t = 0o600;

pub fn pipe_name(base: &Path, oid: Oid) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(format!("_{oid}"));
    PathBuf::from(s)
}

/// Make a FIFO at `path`. Fails if anything already exists there.
#[allow(unsafe_code)]
pub fn create(path: &Path) -> Result<()> {
    let c = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| HelperError::Config(format!("pipe path contains NUL: {}", path.display())))?;
    // SAFETY: `c` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c.as_ptr(), FIFO_MODE) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Unlink the FIFO at `path`; a missing file counts as removed.
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Pipes created by one agent run and not yet removed.
pub struct PipeSet {
    base: PathBuf,
    live: BTreeSet<Oid>,
}

impl PipeSet {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            live: BTreeSet::new(),
        }
    }

    pub fn path(&self, oid: Oid) -> PathBuf {
        pipe_name(&self.base, oid)
    }

    pub fn create(&mut self, oid: Oid) -> Result<()> {
        let path = self.path(oid);
        debug!(oid, pipe = %path.display(), "creating pipe");
        create(&path).at_oid(oid, Phase::CreatePipe)?;
        self.live.insert(oid);
        Ok(())
    }

    /// Blocks until the producer opens its end.
    pub fn open_reader(&self, oid: Oid) -> Result<File> {
        let path = self.path(oid);
        debug!(oid, pipe = %path.display(), "opening pipe for reading");
        File::open(&path).at_oid(oid, Phase::OpenPipe)
    }

    /// Blocks until the consumer opens its end.
    pub fn open_writer(&self, oid: Oid) -> Result<File> {
        let path = self.path(oid);
        debug!(oid, pipe = %path.display(), "opening pipe for writing");
        OpenOptions::new()
            .write(true)
            .open(&path)
            .at_oid(oid, Phase::OpenPipe)
    }

    pub fn remove(&mut self, oid: Oid) -> Result<()> {
        remove(&self.path(oid)).at_oid(oid, Phase::RemovePipe)?;
        self.live.remove(&oid);
        Ok(())
    }

    /// Best-effort removal of every pipe still on disk.
    pub fn sweep(&mut self) {
        for oid in std::mem::take(&mut self.live) {
            let path = self.path(oid);
            if let Err(e) = remove(&path) {
                warn!(oid, pipe = %path.display(), error = %e, "failed to remove pipe");
            }
        }
    }
}
