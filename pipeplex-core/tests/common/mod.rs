#![allow(dead_code)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub fn wait_for(path: &Path) {
    for _ in 0..4000 {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("{} never appeared", path.display());
}

/// Write `payload` into the pipe once it exists; reports whether `ahead`
/// (the readahead pipe) already existed when the agent connected.
pub fn producer(path: PathBuf, payload: Vec<u8>, ahead: Option<PathBuf>) -> JoinHandle<bool> {
    thread::spawn(move || {
        wait_for(&path);
        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        let ahead_ok = ahead.map_or(true, |p| p.exists());
        f.write_all(&payload).unwrap();
        ahead_ok
    })
}

pub fn consumer(path: PathBuf) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        wait_for(&path);
        let mut f = File::open(&path).unwrap();
        let mut out = Vec::new();
        f.read_to_end(&mut out).unwrap();
        out
    })
}

pub fn payload(oid: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i as u32 * 31 + oid) % 253) as u8).collect()
}
