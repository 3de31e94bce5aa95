//! External storage-backend plugin run as a child process.
//!
//! Data flows over the child's stdin (backup) or stdout (restore); whatever the
//! plugin prints on stderr is captured and becomes the error detail.

use std::collections::BTreeMap;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{HelperError, Result};
use crate::toc::SegmentDataEntry;

/// How long a restore plugin may take to exit once its last range is read.
const EXIT_GRACE: Duration = Duration::from_millis(500);
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Plugin option that declares support for `restore_data_subset`.
const RESTORE_SUBSET_OPTION: &str = "restore_subset";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    BackupData,
    RestoreData,
    RestoreDataSubset,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::BackupData => "backup_data",
            Verb::RestoreData => "restore_data",
            Verb::RestoreDataSubset => "restore_data_subset",
        }
    }
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "executablepath")]
    executable_path: String,
    #[serde(default)]
    options: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct PluginConfig {
    pub executable_path: PathBuf,
    pub config_path: PathBuf,
    pub options: BTreeMap<String, String>,
}

impl PluginConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(config_path)?;
        let raw: RawConfig = serde_yaml::from_str(&text).map_err(|e| {
            HelperError::Config(format!("plugin config {}: {e}", config_path.display()))
        })?;
        let exe = expand_env(&raw.executable_path);
        if !exe.starts_with('/') {
            return Err(HelperError::Config(format!(
                "plugin executable {exe} is not an absolute path"
            )));
        }
        Ok(Self {
            executable_path: PathBuf::from(exe),
            config_path: config_path.to_path_buf(),
            options: raw.options,
        })
    }

    /// Whether the plugin can stream just the requested byte ranges.
    pub fn can_restore_subset(&self) -> bool {
        self.options
            .get(RESTORE_SUBSET_OPTION)
            .is_some_and(|v| v.eq_ignore_ascii_case("on"))
    }

    fn command(&self, verb: Verb, data_path: &Path) -> Command {
        let mut cmd = Command::new(&self.executable_path);
        cmd.arg(verb.as_str()).arg(&self.config_path).arg(data_path);
        cmd
    }

    /// Start `backup_data`; the returned stdin is the destination stream.
    pub fn spawn_backup(&self, data_path: &Path) -> Result<(ChildStdin, PluginProcess)> {
        let mut cmd = self.command(Verb::BackupData, data_path);
        cmd.stdin(Stdio::piped()).stdout(Stdio::null());
        let (mut child, proc_) = self.spawn(cmd, Verb::BackupData)?;
        let stdin = child_stdin(&mut child)?;
        Ok((stdin, proc_.with_child(child)))
    }

    /// Start `restore_data`; the returned stdout is the source stream.
    pub fn spawn_restore(&self, data_path: &Path) -> Result<(ChildStdout, PluginProcess)> {
        let mut cmd = self.command(Verb::RestoreData, data_path);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped());
        let (mut child, proc_) = self.spawn(cmd, Verb::RestoreData)?;
        let stdout = child_stdout(&mut child)?;
        Ok((stdout, proc_.with_child(child)))
    }

    /// Start `restore_data_subset`: the plugin reads `ranges` from an offsets
    /// file (`N s1 e1 s2 e2 ...`) and streams only those bytes, back to back.
    pub fn spawn_restore_subset(
        &self,
        data_path: &Path,
        ranges: &[SegmentDataEntry],
    ) -> Result<(ChildStdout, PluginProcess)> {
        let offsets = write_offsets(ranges)?;
        let mut cmd = self.command(Verb::RestoreDataSubset, data_path);
        cmd.arg(offsets.path());
        cmd.stdin(Stdio::null()).stdout(Stdio::piped());
        let (mut child, mut proc_) = self.spawn(cmd, Verb::RestoreDataSubset)?;
        let stdout = child_stdout(&mut child)?;
        proc_.offsets = Some(offsets);
        Ok((stdout, proc_.with_child(child)))
    }

    fn spawn(&self, mut cmd: Command, verb: Verb) -> Result<(Child, PluginProcess)> {
        debug!(
            plugin = %self.executable_path.display(),
            verb = verb.as_str(),
            "starting plugin"
        );
        cmd.stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| {
            HelperError::Upstream(format!(
                "cannot start {}: {e}",
                self.executable_path.display()
            ))
        })?;
        let stderr = child.stderr.take();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let collector = stderr.map(|mut pipe| {
            let sink = Arc::clone(&captured);
            std::thread::spawn(move || {
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut buf) = sink.lock() {
                                buf.extend_from_slice(&chunk[..n]);
                            }
                        }
                    }
                }
            })
        });
        Ok((
            child,
            PluginProcess {
                child: None,
                verb,
                captured,
                collector,
                offsets: None,
            },
        ))
    }
}

fn child_stdin(child: &mut Child) -> Result<ChildStdin> {
    child
        .stdin
        .take()
        .ok_or_else(|| HelperError::Upstream("plugin stdin not captured".into()))
}

fn child_stdout(child: &mut Child) -> Result<ChildStdout> {
    child
        .stdout
        .take()
        .ok_or_else(|| HelperError::Upstream("plugin stdout not captured".into()))
}

fn write_offsets(ranges: &[SegmentDataEntry]) -> Result<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("pipeplex_offsets_")
        .tempfile()?;
    let mut w = BufWriter::new(file.as_file());
    write!(w, "{}", ranges.len())?;
    for r in ranges {
        write!(w, " {} {}", r.start_byte, r.end_byte)?;
    }
    w.flush()?;
    drop(w);
    Ok(file)
}

/// Running plugin: its stderr capture and a deferred exit check.
///
/// Waiting is separate from closing the data stream; a backup plugin may keep
/// uploading after the local side is done.
pub struct PluginProcess {
    child: Option<Child>,
    verb: Verb,
    captured: Arc<Mutex<Vec<u8>>>,
    collector: Option<JoinHandle<()>>,
    // removed once the plugin is gone
    offsets: Option<NamedTempFile>,
}

impl PluginProcess {
    fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Trimmed stderr captured so far.
    pub fn diagnostics(&self) -> String {
        match self.captured.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf)
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
            Err(_) => String::new(),
        }
    }

    /// Fails if the plugin has written anything to stderr.
    pub fn check(&self) -> Result<()> {
        let diag = self.diagnostics();
        if diag.is_empty() {
            Ok(())
        } else {
            Err(HelperError::Upstream(diag))
        }
    }

    /// Account for a broken data stream from the plugin's side, if it has one.
    /// With `closed` set the plugin has dropped its end, so block for its exit.
    pub fn explain(&mut self, closed: bool) -> Option<HelperError> {
        let child = self.child.as_mut()?;
        let status = if closed {
            child.wait().ok()
        } else {
            child.try_wait().ok().flatten()
        };
        if status.is_some() {
            self.join_collector();
        }
        let diag = self.diagnostics();
        match status {
            _ if !diag.is_empty() => Some(HelperError::Upstream(diag)),
            Some(s) if !s.success() => Some(HelperError::Upstream(format!(
                "{} exited with {s}",
                self.verb.as_str()
            ))),
            _ => None,
        }
    }

    fn join_collector(&mut self) {
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
        }
    }

    /// Wait for exit; non-zero status or captured stderr is an error.
    pub fn wait(mut self) -> Result<()> {
        let status = match self.child.take() {
            Some(mut child) => child.wait()?,
            None => return self.check(),
        };
        self.join_collector();
        debug!(verb = self.verb.as_str(), %status, "plugin exited");
        let diag = self.diagnostics();
        if !status.success() {
            let detail = if diag.is_empty() {
                format!("{} exited with {status}", self.verb.as_str())
            } else {
                diag
            };
            return Err(HelperError::Upstream(detail));
        }
        self.check()
    }

    /// End a restore once every range has been read from `stream`.
    ///
    /// The plugin gets a short grace period to exit; a failing exit is an
    /// error, one still streaming is stopped. `stream` stays open until then so
    /// the plugin never sees its reader vanish.
    pub fn finish_restore<S>(mut self, stream: S) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            match wait_with_grace(&mut child, EXIT_GRACE)? {
                Some(status) if !status.success() => {
                    self.join_collector();
                    let diag = self.diagnostics();
                    return Err(HelperError::Upstream(if diag.is_empty() {
                        format!("{} exited with {status}", self.verb.as_str())
                    } else {
                        diag
                    }));
                }
                Some(_) => {}
                None => {
                    warn!(
                        verb = self.verb.as_str(),
                        "plugin still running after the last range, stopping it"
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
        drop(stream);
        self.join_collector();
        self.check()
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                warn!(verb = self.verb.as_str(), "killing unfinished plugin");
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

fn wait_with_grace(child: &mut Child, grace: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL);
    }
}

/// Expand `$NAME` and `${NAME}` from the environment; unknown names become empty.
fn expand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
        }
        out.push_str(&std::env::var(&name).unwrap_or_default());
    }
    out
}
