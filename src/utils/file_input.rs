//! Reading scan targets from a file
//!
//! One address or CIDR block per line. Blank lines and `#` comments are
//! skipped. The whole file is parsed up front so that a bad line stops the
//! run before any host is contacted.

use crate::error::ScanError;
use crate::utils::target_parser::TargetSpec;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read and parse every target in `path`
pub fn read_target_file<P: AsRef<Path>>(path: P) -> crate::Result<Vec<TargetSpec>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ScanError::InputFile {
        path: path.to_path_buf(),
        source,
    })?;

    parse_target_lines(BufReader::new(file), path)
}

/// Parse targets from any line-oriented reader; `path` is only used in errors
pub fn parse_target_lines<R: BufRead>(reader: R, path: &Path) -> crate::Result<Vec<TargetSpec>> {
    let mut specs = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ScanError::InputFile {
            path: path.to_path_buf(),
            source,
        })?;

        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }

        let spec = TargetSpec::parse(entry).map_err(|e| ScanError::InvalidTargetLine {
            path: path.to_path_buf(),
            line: index + 1,
            reason: e.to_string(),
        })?;
        specs.push(spec);
    }

    log::debug!("Loaded {} target entries from {}", specs.len(), path.display());
    Ok(specs)
}
