//! # Distribution Ledger
//!
//! Append-only record of hosts that already received the credential file.
//!
//! ## Format
//! - Plain text, one hostname per line
//! - A missing file is an empty ledger
//!
//! ## Invariants
//! - Entries are only ever appended, never rewritten
//! - A host appears at most once
//! - Appends are fsynced before `record` returns

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::{BootstrapError, BootstrapResult};

/// File-backed distribution ledger
#[derive(Debug, Clone)]
pub struct DistributionLedger {
    path: PathBuf,
}

impl DistributionLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hosts recorded so far, in the order they were appended
    pub fn hosts(&self) -> BootstrapResult<Vec<String>> {
        Ok(parse_hosts(&self.read_raw()?))
    }

    pub fn contains(&self, host: &str) -> BootstrapResult<bool> {
        Ok(self.hosts()?.iter().any(|h| h == host))
    }

    /// Append hosts not yet present. Returns the hosts actually appended.
    pub fn record(&self, hosts: &[String]) -> BootstrapResult<Vec<String>> {
        let raw = self.read_raw()?;
        let mut present: HashSet<String> = parse_hosts(&raw).into_iter().collect();
        let fresh: Vec<String> = hosts
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .filter(|h| present.insert(h.to_string()))
            .map(str::to_string)
            .collect();

        if fresh.is_empty() {
            return Ok(fresh);
        }

        // A hand-edited ledger may lack the final newline.
        let separate = !raw.is_empty() && !raw.ends_with('\n');
        self.append_lines(&fresh, separate)
            .map_err(|e| BootstrapError::io(&self.path, e))?;

        Ok(fresh)
    }

    fn read_raw(&self) -> BootstrapResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(BootstrapError::io(&self.path, e)),
        }
    }

    fn append_lines(&self, hosts: &[String], separate: bool) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = BufWriter::new(file);
        if separate {
            writeln!(writer)?;
        }
        for host in hosts {
            writeln!(writer, "{}", host)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

fn parse_hosts(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = DistributionLedger::new(dir.path().join("ledger"));

        assert!(ledger.hosts().unwrap().is_empty());
        assert!(!ledger.contains("h1").unwrap());
    }

    #[test]
    fn test_record_appends_once() {
        let dir = TempDir::new().unwrap();
        let ledger = DistributionLedger::new(dir.path().join("ledger"));

        let first = ledger.record(&hosts(&["h1", "h2"])).unwrap();
        let second = ledger.record(&hosts(&["h2", "h3", "h3"])).unwrap();

        assert_eq!(first, hosts(&["h1", "h2"]));
        assert_eq!(second, hosts(&["h3"]));
        assert_eq!(ledger.hosts().unwrap(), hosts(&["h1", "h2", "h3"]));

        let raw = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(raw, "h1\nh2\nh3\n");
    }

    #[test]
    fn test_record_nothing_leaves_file_absent() {
        let dir = TempDir::new().unwrap();
        let ledger = DistributionLedger::new(dir.path().join("ledger"));

        assert!(ledger.record(&[]).unwrap().is_empty());
        assert!(!ledger.path().exists());
    }

    #[test]
    fn test_reading_tolerates_blank_and_duplicate_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger");
        fs::write(&path, "h1\n\n  h2  \nh1\n").unwrap();

        let ledger = DistributionLedger::new(&path);
        assert_eq!(ledger.hosts().unwrap(), hosts(&["h1", "h2"]));
    }

    #[test]
    fn test_existing_entries_are_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger");
        fs::write(&path, "old-host\n").unwrap();

        DistributionLedger::new(&path)
            .record(&hosts(&["new-host"]))
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "old-host\nnew-host\n");
    }

    #[test]
    fn test_append_after_missing_final_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger");
        fs::write(&path, "old-host").unwrap();

        let ledger = DistributionLedger::new(&path);
        ledger.record(&hosts(&["new-host"])).unwrap();

        assert_eq!(ledger.hosts().unwrap(), hosts(&["old-host", "new-host"]));
    }
}
