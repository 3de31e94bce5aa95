use std::path::{Path, PathBuf};

use pipeplex_core::agent::{
    BackupOptions, DataLocation, RestoreOptions, Session, run_backup, run_restore,
};
use pipeplex_core::codec::{CodecId, Compression};
use pipeplex_core::error::{HelperError, Oid, Result};
use pipeplex_core::oids::read_oid_file;
use pipeplex_core::plugin::PluginConfig;
use pipeplex_core::toc::SegmentToc;
use tracing::info;

use crate::presentation::cli::Cli;

const DEFAULT_BACKUP_CODEC: &str = "gzip";

pub fn load_oids(oid: Option<Oid>, oid_file: Option<&Path>) -> Result<Vec<Oid>> {
    match (oid, oid_file) {
        (Some(0), _) => Err(HelperError::Config("oid must be positive".into())),
        (Some(oid), _) => Ok(vec![oid]),
        (None, Some(path)) => read_oid_file(path),
        (None, None) => Err(HelperError::Config("no oid or oid file given".into())),
    }
}

/// Level 0 means an uncompressed data file, whatever the kind; the kind is
/// still checked so a typo is not silently ignored.
pub fn backup_compression(kind: Option<&str>, level: i32) -> Result<Compression> {
    let id = CodecId::parse(kind.unwrap_or(DEFAULT_BACKUP_CODEC))?;
    if level == 0 {
        return Ok(Compression::none());
    }
    Compression::new(id, level)
}

pub fn restore_codec(kind: Option<&str>, data_file: &Path) -> Result<CodecId> {
    match kind {
        Some(k) => CodecId::parse(k),
        None => Ok(CodecId::from_path(data_file)),
    }
}

fn data_location(plugin_config: Option<&Path>, data_file: PathBuf) -> Result<DataLocation> {
    Ok(match plugin_config {
        Some(cfg) => DataLocation::Plugin {
            config: PluginConfig::load(cfg)?,
            data_path: data_file,
        },
        None => DataLocation::File(data_file),
    })
}

pub fn handle_backup(cli: &Cli, session: &Session, oids: &[Oid]) -> Result<()> {
    let compression = backup_compression(cli.compression_type.as_deref(), cli.compression_level)?;
    let toc = if cli.resume {
        SegmentToc::load_or_create(&cli.toc_file)?
    } else {
        SegmentToc::new()
    };
    let opts = BackupOptions {
        pipe_base: cli.pipe_file.clone(),
        toc_path: cli.toc_file.clone(),
        destination: data_location(cli.plugin_config.as_deref(), cli.data_file.clone())?,
        compression,
        readahead: cli.copy_queue_size,
    };
    let toc = run_backup(session, oids, &opts, toc)?;
    info!(
        tables = toc.len(),
        bytes = toc.last_byte_read,
        toc = %cli.toc_file.display(),
        "backup complete"
    );
    Ok(())
}

pub fn handle_restore(cli: &Cli, session: &Session, oids: &[Oid]) -> Result<()> {
    let toc = SegmentToc::load(&cli.toc_file)?;
    let opts = RestoreOptions {
        pipe_base: cli.pipe_file.clone(),
        source: data_location(cli.plugin_config.as_deref(), cli.data_file.clone())?,
        compression: restore_codec(cli.compression_type.as_deref(), &cli.data_file)?,
        readahead: cli.copy_queue_size,
    };
    let bytes = run_restore(session, oids, &toc, &opts)?;
    info!(tables = oids.len(), bytes, "restore complete");
    Ok(())
}
