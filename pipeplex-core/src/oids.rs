use std::path::Path;

use crate::error::{HelperError, Oid, Result};

/// Parse an oid list: one positive integer per line, blank lines ignored.
///
/// The result is sorted ascending so every run reading the same file walks the
/// tables in the same order.
pub fn parse_oid_list(text: &str) -> Result<Vec<Oid>> {
    let mut oids = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let oid: Oid = line.parse().map_err(|_| {
            HelperError::Config(format!("line {}: invalid oid {line:?}", lineno + 1))
        })?;
        if oid == 0 {
            return Err(HelperError::Config(format!(
                "line {}: oid must be positive",
                lineno + 1
            )));
        }
        oids.push(oid);
    }
    oids.sort_unstable();
    if let Some(w) = oids.windows(2).find(|w| w[0] == w[1]) {
        return Err(HelperError::Config(format!("oid {} listed twice", w[0])));
    }
    Ok(oids)
}

pub fn read_oid_file(path: &Path) -> Result<Vec<Oid>> {
    let text = std::fs::read_to_string(path)?;
    parse_oid_list(&text)
}
