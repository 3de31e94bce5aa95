//! End-to-end runs over real FIFOs, with threads standing in for the
//! per-table producer and consumer processes.

mod common;

use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use pipeplex_core::codec::CodecId;
use pipeplex_core::pipe::pipe_name;
use pipeplex_core::{
    BackupOptions, CancelFlag, Compression, DataLocation, RestoreOptions, SegmentToc, Session,
    run_backup, run_restore,
};
use tempfile::TempDir;

use common::{consumer, payload, producer, wait_for};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn base(&self) -> PathBuf {
        self.dir.path().join("gpbackup_0_pipe")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn backup_opts(&self, data: &str, compression: Compression, readahead: usize) -> BackupOptions {
        BackupOptions {
            pipe_base: self.base(),
            toc_path: self.path("toc.yaml"),
            destination: DataLocation::File(self.path(data)),
            compression,
            readahead,
        }
    }

    fn restore_opts(&self, data: &str, readahead: usize) -> RestoreOptions {
        let path = self.path(data);
        RestoreOptions {
            pipe_base: self.base(),
            compression: CodecId::from_path(&path),
            source: DataLocation::File(path),
            readahead,
        }
    }

    fn backup(
        &self,
        oids: &[u32],
        tables: &[Vec<u8>],
        opts: &BackupOptions,
        toc: SegmentToc,
    ) -> SegmentToc {
        let d = opts.readahead;
        let handles: Vec<_> = oids
            .iter()
            .enumerate()
            .map(|(i, &oid)| {
                let ahead = oids.get(i + d).map(|&o| pipe_name(&self.base(), o));
                producer(pipe_name(&self.base(), oid), tables[i].clone(), ahead)
            })
            .collect();
        let toc = run_backup(&Session::new(0), oids, opts, toc).unwrap();
        for h in handles {
            assert!(h.join().unwrap(), "readahead pipe missing while draining");
        }
        toc
    }

    fn restore(&self, oids: &[u32], toc: &SegmentToc, opts: &RestoreOptions) -> Vec<Vec<u8>> {
        let handles: Vec<_> = oids
            .iter()
            .map(|&oid| consumer(pipe_name(&self.base(), oid)))
            .collect();
        run_restore(&Session::new(0), oids, toc, opts).unwrap();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn leftover_pipes(&self) -> Vec<String> {
        fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("gpbackup_0_pipe_") && !n.ends_with("_error"))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

#[test]
fn backup_records_contiguous_ranges() {
    let fx = Fixture::new();
    let tables = vec![b"aaaaa".to_vec(), b"bbbbbbb".to_vec(), b"ccc".to_vec()];
    let opts = fx.backup_opts("data", Compression::none(), 1);
    let toc = fx.backup(&[10, 20, 30], &tables, &opts, SegmentToc::new());

    assert_eq!(toc.last_byte_read, 15);
    let ranges: Vec<_> = [10, 20, 30]
        .iter()
        .map(|&o| {
            let e = toc.entry(o).unwrap();
            (e.start_byte, e.end_byte)
        })
        .collect();
    assert_eq!(ranges, [(0, 5), (5, 12), (12, 15)]);
    assert_eq!(fs::read(fx.path("data")).unwrap(), b"aaaaabbbbbbbccc");
    assert_eq!(SegmentToc::load(&opts.toc_path).unwrap(), toc);
    assert!(fx.leftover_pipes().is_empty());
}

#[test]
fn restore_single_table_discards_prefix() {
    let fx = Fixture::new();
    let tables = vec![b"aaaaa".to_vec(), b"bbbbbbb".to_vec(), b"ccc".to_vec()];
    let opts = fx.backup_opts("data", Compression::none(), 1);
    let toc = fx.backup(&[10, 20, 30], &tables, &opts, SegmentToc::new());

    let out = fx.restore(&[20], &toc, &fx.restore_opts("data", 1));
    assert_eq!(out, [b"bbbbbbb".to_vec()]);
    assert!(fx.leftover_pipes().is_empty());
}

#[test]
fn empty_oid_list_still_produces_destination_and_toc() {
    let fx = Fixture::new();
    let opts = fx.backup_opts("data", Compression::none(), 1);
    let toc = run_backup(&Session::new(0), &[], &opts, SegmentToc::new()).unwrap();

    assert_eq!(toc.last_byte_read, 0);
    assert!(toc.is_empty());
    assert_eq!(fs::metadata(fx.path("data")).unwrap().len(), 0);
    assert!(opts.toc_path.exists());
    assert!(fx.leftover_pipes().is_empty());
}

#[test]
fn invalid_compression_fails_before_touching_anything() {
    let fx = Fixture::new();
    assert_eq!(Compression::parse("lz4", 3).unwrap_err().code(), "CONFIG");

    let bad = Compression {
        id: CodecId::Gzip,
        level: 42,
    };
    let opts = fx.backup_opts("data", bad, 1);
    let err = run_backup(&Session::new(0), &[1, 2], &opts, SegmentToc::new()).unwrap_err();
    assert_eq!(err.code(), "CONFIG");
    assert!(!fx.path("data").exists());
    assert!(fx.leftover_pipes().is_empty());
    assert!(!pipe_name(&fx.base(), 1).exists());
}

#[test]
fn cancellation_aborts_without_toc() {
    let fx = Fixture::new();
    let flag = CancelFlag::new();
    flag.cancel();
    let session = Session::with_cancel(0, flag);
    let opts = fx.backup_opts("data", Compression::none(), 2);

    let err = run_backup(&session, &[1, 2, 3], &opts, SegmentToc::new()).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!opts.toc_path.exists());
    assert!(fx.leftover_pipes().is_empty());
    assert!(fx.path("gpbackup_0_pipe_error").exists());
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

fn round_trip(compression: Compression, data: &str, readahead: usize) {
    let fx = Fixture::new();
    let oids = [3, 7, 11, 19, 23];
    let tables: Vec<_> = oids
        .iter()
        .zip([40_000usize, 0, 1, 150_000, 9_999])
        .map(|(&o, n)| payload(o, n))
        .collect();
    let opts = fx.backup_opts(data, compression, readahead);
    let toc = fx.backup(&oids, &tables, &opts, SegmentToc::new());
    assert_eq!(
        toc.last_byte_read,
        tables.iter().map(|t| t.len() as u64).sum::<u64>()
    );

    let toc = SegmentToc::load(&opts.toc_path).unwrap();
    let out = fx.restore(&oids, &toc, &fx.restore_opts(data, readahead));
    assert_eq!(out, tables);
    assert!(fx.leftover_pipes().is_empty());
}

#[test]
fn round_trip_uncompressed() {
    round_trip(Compression::none(), "data", 1);
}

#[test]
fn round_trip_gzip_with_deep_readahead() {
    round_trip(Compression::parse("gzip", 6).unwrap(), "data.gz", 3);
}

#[test]
fn round_trip_zstd() {
    round_trip(Compression::parse("zstd", 3).unwrap(), "data.zst", 2);
}

#[test]
fn resumed_backup_appends_to_stream() {
    let fx = Fixture::new();
    let first = vec![payload(1, 3000), payload(2, 10)];
    let opts = fx.backup_opts("data.gz", Compression::parse("gzip", 1).unwrap(), 1);
    let partial = fx.backup(&[1, 2], &first, &opts, SegmentToc::new());

    let mut resumed = opts.clone();
    resumed.toc_path = fx.path("toc_resumed.yaml");
    let third = vec![payload(3, 777)];
    let toc = fx.backup(&[3], &third, &resumed, partial);
    assert_eq!(toc.entry(3).unwrap().start_byte, 3010);
    assert_eq!(toc.last_byte_read, 3787);

    let out = fx.restore(&[1, 2, 3], &toc, &fx.restore_opts("data.gz", 1));
    assert_eq!(out, [first[0].clone(), first[1].clone(), third[0].clone()]);
}

// ---------------------------------------------------------------------------
// Restore failures
// ---------------------------------------------------------------------------

#[test]
fn restore_rejects_oid_missing_from_toc() {
    let fx = Fixture::new();
    let mut toc = SegmentToc::new();
    toc.append(1, 4).unwrap();
    let err = run_restore(&Session::new(0), &[1, 2], &toc, &fx.restore_opts("data", 1))
        .unwrap_err();
    assert_eq!(err.code(), "CONFIG");
    assert!(fx.leftover_pipes().is_empty());
}

#[test]
fn restore_refuses_to_rewind_on_mismatched_order() {
    let fx = Fixture::new();
    let tables = vec![b"aaaaa".to_vec(), b"bbbbbbb".to_vec(), b"ccc".to_vec()];
    let opts = fx.backup_opts("data", Compression::none(), 1);
    let toc = fx.backup(&[10, 20, 30], &tables, &opts, SegmentToc::new());

    let first = consumer(pipe_name(&fx.base(), 30));
    let second = consumer(pipe_name(&fx.base(), 10));
    let err = run_restore(&Session::new(0), &[30, 10], &toc, &fx.restore_opts("data", 1))
        .unwrap_err();
    assert_eq!(err.code(), "CONFIG");
    assert_eq!(first.join().unwrap(), b"ccc");
    assert!(second.join().unwrap().is_empty());
    assert!(fx.leftover_pipes().is_empty());
}

#[test]
fn restore_short_source_is_io_error() {
    let fx = Fixture::new();
    fs::write(fx.path("data"), b"abc").unwrap();
    let mut toc = SegmentToc::new();
    toc.append(5, 10).unwrap();

    let c = consumer(pipe_name(&fx.base(), 5));
    let err = run_restore(&Session::new(0), &[5], &toc, &fx.restore_opts("data", 1)).unwrap_err();
    assert_eq!(err.code(), "IO");
    assert!(err.to_string().starts_with("oid 5: copy:"));
    // consumer sees the partial data and then an abrupt close
    assert_eq!(c.join().unwrap(), b"abc");
}

#[test]
fn restore_cancellation_stops_before_next_table() {
    let fx = Fixture::new();
    let tables = vec![b"aaaaa".to_vec(), b"bbbbbbb".to_vec(), b"ccc".to_vec()];
    let opts = fx.backup_opts("data", Compression::none(), 1);
    let toc = fx.backup(&[10, 20, 30], &tables, &opts, SegmentToc::new());

    let flag = CancelFlag::new();
    let session = Session::with_cancel(0, flag.clone());

    // the first consumer requests termination once it has its table; the
    // second only connects after that, so the agent sees the flag next
    let first = {
        let path = pipe_name(&fx.base(), 10);
        let flag = flag.clone();
        thread::spawn(move || {
            wait_for(&path);
            let mut out = Vec::new();
            File::open(&path).unwrap().read_to_end(&mut out).unwrap();
            flag.cancel();
            out
        })
    };
    let second = {
        let path = pipe_name(&fx.base(), 20);
        let flag = flag.clone();
        thread::spawn(move || {
            wait_for(&path);
            while !flag.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            let mut out = Vec::new();
            File::open(&path).unwrap().read_to_end(&mut out).unwrap();
            out
        })
    };

    let err = run_restore(&session, &[10, 20, 30], &toc, &fx.restore_opts("data", 1))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(first.join().unwrap(), b"aaaaa");
    assert!(second.join().unwrap().is_empty());
    assert!(fx.leftover_pipes().is_empty());
    assert!(fx.path("gpbackup_0_pipe_error").exists());
}
