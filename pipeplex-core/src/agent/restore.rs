use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::{debug, error, info, info_span, warn};

use super::session::{Session, mark_failure};
use super::{DataLocation, check_oids, stream_error};
use crate::codec::CodecId;
use crate::error::{HelperError, Oid, OidContext, Phase, Result};
use crate::pipe::PipeSet;
use crate::plugin::PluginProcess;
use crate::toc::SegmentToc;

const SOURCE_BUF: usize = 256 * 1024;

#[derive(Clone, Debug)]
pub struct RestoreOptions {
    /// Pipes are named `<pipe_base>_<oid>`.
    pub pipe_base: PathBuf,
    pub source: DataLocation,
    pub compression: CodecId,
    /// Number of pipes kept created ahead of the one being filled (>= 1).
    pub readahead: usize,
}

/// The multiplexed stream, positioned by skipping forward only.
enum DataReader {
    /// Uncompressed local file: positioned with seek.
    Seekable(File),
    Stream(BufReader<Box<dyn Read>>),
    /// Plugin output holding only the requested ranges, back to back: gaps
    /// between ranges were already dropped at the source.
    Subset(BufReader<Box<dyn Read>>),
}

impl DataReader {
    fn inner(&mut self) -> &mut dyn Read {
        match self {
            DataReader::Seekable(f) => f,
            DataReader::Stream(r) | DataReader::Subset(r) => r,
        }
    }

    fn skip(&mut self, n: u64) -> std::io::Result<()> {
        if n == 0 || matches!(self, DataReader::Subset(_)) {
            return Ok(());
        }
        if let DataReader::Seekable(f) = self {
            let off = i64::try_from(n)
                .map_err(|_| std::io::Error::new(ErrorKind::InvalidInput, "skip too large"))?;
            f.seek(SeekFrom::Current(off))?;
            return Ok(());
        }
        self.copy_exact(n, &mut std::io::sink()).map(|_| ())
    }

    /// Copy exactly `n` bytes; running out early is an error.
    fn copy_exact(&mut self, n: u64, dst: &mut dyn Write) -> std::io::Result<u64> {
        let got = std::io::copy(&mut self.inner().take(n), dst)?;
        if got < n {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("short read: expected {n} bytes, got {got}"),
            ));
        }
        Ok(got)
    }
}

/// Slice one source stream into one pipe per oid using TOC byte ranges.
///
/// `oids` must be in the order the TOC was written in. Returns the number of
/// bytes delivered to pipes.
pub fn run_restore(
    session: &Session,
    oids: &[Oid],
    toc: &SegmentToc,
    opts: &RestoreOptions,
) -> Result<u64> {
    let span = info_span!("segment", content = session.content);
    let _enter = span.enter();

    check_oids(oids, opts.readahead)?;
    for &oid in oids {
        toc.entry(oid)?;
    }
    if oids.is_empty() {
        info!("no tables to restore");
        return Ok(0);
    }

    info!(
        tables = oids.len(),
        compression = opts.compression.name(),
        readahead = opts.readahead,
        "starting restore agent"
    );
    let mut pipes = PipeSet::new(&opts.pipe_base);
    match fill(session, oids, toc, opts, &mut pipes) {
        Ok(bytes) => {
            info!(bytes, "restore agent finished");
            Ok(bytes)
        }
        Err(e) => {
            error!(error = %e, "restore agent failed");
            pipes.sweep();
            mark_failure(&opts.pipe_base, &e);
            Err(e)
        }
    }
}

fn fill(
    session: &Session,
    oids: &[Oid],
    toc: &SegmentToc,
    opts: &RestoreOptions,
    pipes: &mut PipeSet,
) -> Result<u64> {
    let depth = opts.readahead;
    for &oid in oids.iter().take(depth) {
        pipes.create(oid)?;
    }

    // Connect the first consumer before opening the source, so a failing
    // source still shows up on that consumer as an abrupt close.
    let first = oids[0];
    let mut next_writer = Some(BufWriter::new(pipes.open_writer(first)?));
    let (mut data, mut plugin) =
        open_source(opts, toc, oids).at_oid(first, Phase::OpenSource)?;

    let mut last_byte = 0u64;
    let mut total = 0u64;
    for (i, &oid) in oids.iter().enumerate() {
        if let Err(e) = session.check_cancelled() {
            warn!(oid, "termination requested, aborting restore");
            return Err(e);
        }
        if let Some(&ahead) = oids.get(i + depth) {
            pipes.create(ahead)?;
        }
        let mut writer = match next_writer.take() {
            Some(w) => w,
            None => BufWriter::new(pipes.open_writer(oid)?),
        };

        let entry = toc.entry(oid).at_oid(oid, Phase::Skip)?;
        if entry.start_byte < last_byte {
            return Err(HelperError::Toc(format!(
                "entry starts at byte {} but the stream is already at {last_byte}; \
                 oid order differs from the backup",
                entry.start_byte
            ))
            .at(oid, Phase::Skip));
        }
        let gap = entry.start_byte - last_byte;
        debug!(
            oid,
            start = entry.start_byte,
            end = entry.end_byte,
            last = last_byte,
            "positioning data reader"
        );
        data.skip(gap).map_err(|e| {
            let closed = e.kind() == ErrorKind::UnexpectedEof;
            stream_error(e, plugin.as_mut(), closed).at(oid, Phase::Skip)
        })?;

        let n = data.copy_exact(entry.len(), &mut writer).map_err(|e| {
            let closed = e.kind() == ErrorKind::UnexpectedEof;
            stream_error(e, plugin.as_mut(), closed).at(oid, Phase::Copy)
        })?;
        debug!(oid, bytes = n, "copied table into pipe");

        writer.flush().at_oid(oid, Phase::ClosePipe)?;
        drop(writer);
        last_byte = entry.end_byte;
        total += n;
        pipes.remove(oid)?;

        if let Some(&next) = oids.get(i + 1) {
            next_writer = Some(BufWriter::new(pipes.open_writer(next)?));
        }
    }

    match plugin {
        Some(plugin) => plugin.finish_restore(data)?,
        None => drop(data),
    }
    Ok(total)
}

fn open_source(
    opts: &RestoreOptions,
    toc: &SegmentToc,
    oids: &[Oid],
) -> Result<(DataReader, Option<PluginProcess>)> {
    match &opts.source {
        DataLocation::File(path) => {
            debug!(data_file = %path.display(), "opening data file");
            let f = File::open(path)?;
            if opts.compression == CodecId::Store {
                return Ok((DataReader::Seekable(f), None));
            }
            let r = opts.compression.decoder(Box::new(f))?;
            Ok((DataReader::Stream(BufReader::with_capacity(SOURCE_BUF, r)), None))
        }
        DataLocation::Plugin { config, data_path }
            if opts.compression == CodecId::Store && config.can_restore_subset() =>
        {
            let ranges = oids
                .iter()
                .map(|&oid| toc.entry(oid))
                .collect::<Result<Vec<_>>>()?;
            debug!(ranges = ranges.len(), "requesting byte ranges from plugin");
            let (stdout, plugin) = config.spawn_restore_subset(data_path, &ranges)?;
            let r: Box<dyn Read> = Box::new(stdout);
            Ok((
                DataReader::Subset(BufReader::with_capacity(SOURCE_BUF, r)),
                Some(plugin),
            ))
        }
        DataLocation::Plugin { config, data_path } => {
            let (stdout, plugin) = config.spawn_restore(data_path)?;
            let r = opts.compression.decoder(Box::new(stdout))?;
            Ok((
                DataReader::Stream(BufReader::with_capacity(SOURCE_BUF, r)),
                Some(plugin),
            ))
        }
    }
}
