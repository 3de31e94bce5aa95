use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind};
use std::path::PathBuf;

use tracing::{debug, error, info, info_span, warn};

use super::session::{Session, mark_failure};
use super::{DataLocation, check_oids, stream_error};
use crate::codec::{Compression, SinkWriter};
use crate::error::{HelperError, Oid, OidContext, Phase, Result};
use crate::pipe::PipeSet;
use crate::plugin::PluginProcess;
use crate::toc::SegmentToc;

const PIPE_READ_BUF: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct BackupOptions {
    /// Pipes are named `<pipe_base>_<oid>`.
    pub pipe_base: PathBuf,
    pub toc_path: PathBuf,
    pub destination: DataLocation,
    pub compression: Compression,
    /// Number of pipes kept created ahead of the one being drained (>= 1).
    pub readahead: usize,
}

struct Sink {
    writer: Box<dyn SinkWriter>,
    plugin: Option<PluginProcess>,
}

/// Drain one pipe per oid, in order, into a single compressed destination.
///
/// `toc` is either empty or a partial TOC from an interrupted run; new entries
/// are appended after its last byte. The TOC is persisted and made read-only
/// only when every table, the destination close and the plugin exit succeed.
pub fn run_backup(
    session: &Session,
    oids: &[Oid],
    opts: &BackupOptions,
    toc: SegmentToc,
) -> Result<SegmentToc> {
    let span = info_span!("segment", content = session.content);
    let _enter = span.enter();

    opts.compression.validate()?;
    check_oids(oids, opts.readahead)?;
    if let Some(&oid) = oids.iter().find(|o| toc.data_entries.contains_key(o)) {
        return Err(HelperError::DuplicateEntry(oid));
    }
    let resuming = toc.last_byte_read > 0;
    if resuming && opts.destination.is_plugin() {
        return Err(HelperError::Config(
            "cannot resume a backup into a plugin destination".into(),
        ));
    }

    info!(
        tables = oids.len(),
        compression = opts.compression.id.name(),
        readahead = opts.readahead,
        resume_from = toc.last_byte_read,
        "starting backup agent"
    );
    let mut pipes = PipeSet::new(&opts.pipe_base);
    match drain(session, oids, opts, &mut pipes, toc, resuming) {
        Ok(toc) => {
            info!(bytes = toc.last_byte_read, "finished writing segment TOC");
            Ok(toc)
        }
        Err(e) => {
            error!(error = %e, "backup agent failed");
            pipes.sweep();
            mark_failure(&opts.pipe_base, &e);
            Err(e)
        }
    }
}

fn drain(
    session: &Session,
    oids: &[Oid],
    opts: &BackupOptions,
    pipes: &mut PipeSet,
    mut toc: SegmentToc,
    resuming: bool,
) -> Result<SegmentToc> {
    let depth = opts.readahead;
    for &oid in oids.iter().take(depth) {
        pipes.create(oid)?;
    }

    let mut sink: Option<Sink> = None;
    for (i, &oid) in oids.iter().enumerate() {
        if let Err(e) = session.check_cancelled() {
            warn!(oid, "termination requested, aborting backup");
            return Err(e);
        }
        // Create ahead before blocking on the current pipe: the producer for
        // that oid may be waiting for its pipe to appear.
        if let Some(&ahead) = oids.get(i + depth) {
            pipes.create(ahead)?;
        }

        let handle = pipes.open_reader(oid)?;
        let s = match sink.take() {
            Some(s) => sink.insert(s),
            None => sink.insert(
                open_destination(opts, resuming).at_oid(oid, Phase::OpenDestination)?,
            ),
        };

        debug!(oid, "backing up table");
        let mut reader = BufReader::with_capacity(PIPE_READ_BUF, handle);
        let n = std::io::copy(&mut reader, &mut s.writer).map_err(|e| {
            let closed = e.kind() == ErrorKind::BrokenPipe;
            stream_error(e, s.plugin.as_mut(), closed).at(oid, Phase::Copy)
        })?;
        let entry = toc.append(oid, n).at_oid(oid, Phase::Copy)?;
        debug!(oid, bytes = n, start = entry.start_byte, end = entry.end_byte, "read table");

        drop(reader);
        pipes.remove(oid)?;
    }

    let sink = match sink {
        Some(s) => s,
        None => open_destination(opts, resuming)?,
    };
    let Sink { writer, plugin } = sink;
    writer.close()?;
    if let Some(plugin) = plugin {
        info!("uploading remaining data to plugin destination");
        plugin.wait()?;
    }

    toc.persist(&opts.toc_path)?;
    Ok(toc)
}

fn open_destination(opts: &BackupOptions, append: bool) -> Result<Sink> {
    match &opts.destination {
        DataLocation::File(path) => {
            debug!(data_file = %path.display(), append, "opening data file");
            let f = if append {
                OpenOptions::new().append(true).open(path)?
            } else {
                File::create(path)?
            };
            Ok(Sink {
                writer: opts.compression.writer(Box::new(f))?,
                plugin: None,
            })
        }
        DataLocation::Plugin { config, data_path } => {
            let (stdin, plugin) = config.spawn_backup(data_path)?;
            Ok(Sink {
                writer: opts.compression.writer(Box::new(stdin))?,
                plugin: Some(plugin),
            })
        }
    }
}
