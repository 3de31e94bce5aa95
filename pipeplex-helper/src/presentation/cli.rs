use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Per-segment backup/restore helper: multiplexes table pipes into one data file",
    long_about = None
)]
#[command(group(ArgGroup::new("mode").required(true).args(["backup_agent", "restore_agent"])))]
#[command(group(ArgGroup::new("tables").required(true).args(["oid", "oid_file"])))]
pub struct Cli {
    /// Drain per-table pipes into the data file and write the TOC
    #[arg(long)]
    pub backup_agent: bool,

    /// Split the data file back into per-table pipes using the TOC
    #[arg(long)]
    pub restore_agent: bool,

    /// Content id of the segment this agent serves
    #[arg(long, default_value_t = -2, allow_negative_numbers = true)]
    pub content: i32,

    /// A single table oid
    #[arg(long)]
    pub oid: Option<u32>,

    /// File with one table oid per line
    #[arg(long = "oid-file")]
    pub oid_file: Option<PathBuf>,

    /// Segment TOC: written by backup, read by restore
    #[arg(long = "toc-file")]
    pub toc_file: PathBuf,

    /// Multiplexed data file (local path, or the path handed to the plugin)
    #[arg(long = "data-file")]
    pub data_file: PathBuf,

    /// Base name of the per-table pipes; each pipe is `<base>_<oid>`
    #[arg(long = "pipe-file")]
    pub pipe_file: PathBuf,

    /// Plugin config YAML; when set the data file is stored by the plugin
    #[arg(long = "plugin-config")]
    pub plugin_config: Option<PathBuf>,

    /// none, gzip or zstd (restore infers it from the data file suffix if omitted)
    #[arg(long = "compression-type")]
    pub compression_type: Option<String>,

    /// Backup compression level; 0 writes uncompressed data
    #[arg(long = "compression-level", default_value_t = 0)]
    pub compression_level: i32,

    /// Number of pipes created ahead of the one being copied
    #[arg(long = "copy-queue-size", default_value_t = 1)]
    pub copy_queue_size: usize,

    /// Continue a partial backup, appending to its TOC and data file.
    ///
    /// The TOC must still be writable: a partial manifest left for this run by
    /// the orchestrator. A TOC finalized by a completed run is refused, and a
    /// missing one starts a fresh backup.
    #[arg(long, conflicts_with = "restore_agent")]
    pub resume: bool,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long)]
    pub verbose: bool,
}
