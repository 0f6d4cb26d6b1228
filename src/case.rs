//! Fingerprint-addressed test-case storage.
//!
//! A case owns exactly one input file and one answer file under the data
//! root, sharded by the fingerprint prefix. Files are written once
//! (write-then-close) and read-only afterwards; concurrent sessions
//! referencing the same fingerprint never race because nobody rewrites an
//! existing fingerprint's storage.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::JudgeConfig;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

const WORLD_READABLE: u32 = 0o004;

/// One test case: an input blob and an expected-answer blob.
#[derive(Debug, Clone)]
pub struct Case {
    fingerprint: Fingerprint,
    input_file: PathBuf,
    answer_file: PathBuf,
}

impl Case {
    pub fn new(config: &JudgeConfig, fingerprint: Fingerprint) -> Self {
        let input_file = data_path(&config.data_root, "in", &fingerprint);
        let answer_file = data_path(&config.data_root, "out", &fingerprint);
        Self {
            fingerprint,
            input_file,
            answer_file,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn input_file(&self) -> &Path {
        &self.input_file
    }

    pub fn answer_file(&self) -> &Path {
        &self.answer_file
    }

    /// Write the input blob. One write per case lifetime.
    pub fn write_input(&self, bytes: &[u8]) -> Result<()> {
        write_once(&self.input_file, bytes)
    }

    /// Write the answer blob. One write per case lifetime.
    pub fn write_answer(&self, bytes: &[u8]) -> Result<()> {
        write_once(&self.answer_file, bytes)
    }

    /// Check that both blobs exist and are readable by the confined user.
    pub fn validate(&self) -> Result<()> {
        for (label, path) in [("input", &self.input_file), ("answer", &self.answer_file)] {
            let meta = fs::metadata(path).map_err(|_| {
                Error::Config(format!(
                    "case {}: missing {} file {}",
                    self.fingerprint,
                    label,
                    path.display()
                ))
            })?;
            if !meta.is_file() {
                return Err(Error::Config(format!(
                    "case {}: {} is not a regular file",
                    self.fingerprint, label
                )));
            }
            if meta.permissions().mode() & WORLD_READABLE == 0 {
                return Err(Error::Config(format!(
                    "case {}: {} file is not readable by the confined user",
                    self.fingerprint, label
                )));
            }
        }
        Ok(())
    }

    /// Remove both blobs and their shard directories if empty.
    pub fn remove(self) -> Result<()> {
        for path in [&self.input_file, &self.answer_file] {
            if path.exists() {
                fs::remove_file(path)?;
            }
            if let Some(dir) = path.parent() {
                // Non-empty shard directories are shared with other cases.
                let _ = fs::remove_dir(dir);
            }
        }
        debug!(fingerprint = %self.fingerprint, "removed case storage");
        Ok(())
    }
}

/// `<root>/<category>/<ab>/<cd>/<fingerprint>`
fn data_path(root: &Path, category: &str, fingerprint: &Fingerprint) -> PathBuf {
    let (first, second) = fingerprint.shard_segments();
    root.join(category)
        .join(first)
        .join(second)
        .join(fingerprint.as_str())
}

fn write_once(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.exists() {
        // Idempotent by fingerprint: the bytes are already there.
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, bytes)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &Path) -> JudgeConfig {
        JudgeConfig {
            data_root: root.to_path_buf(),
            ..JudgeConfig::default()
        }
    }

    #[test]
    fn layout_is_sharded_by_fingerprint_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let case = Case::new(&config, Fingerprint::from_external("abcdef012345"));
        assert!(case
            .input_file()
            .ends_with("in/ab/cd/abcdef012345"));
        assert!(case
            .answer_file()
            .ends_with("out/ab/cd/abcdef012345"));
    }

    #[test]
    fn validate_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let case = Case::new(&config, Fingerprint::of_bytes(b"case-1"));
        assert!(case.validate().is_err());

        case.write_input(b"1 2\n").unwrap();
        assert!(case.validate().is_err());

        case.write_answer(b"3\n").unwrap();
        case.validate().unwrap();
    }

    #[test]
    fn writes_are_idempotent_per_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let case = Case::new(&config, Fingerprint::of_bytes(b"case-2"));
        case.write_input(b"first\n").unwrap();
        case.write_input(b"second\n").unwrap();
        assert_eq!(fs::read(case.input_file()).unwrap(), b"first\n");
    }

    #[test]
    fn remove_deletes_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let case = Case::new(&config, Fingerprint::of_bytes(b"case-3"));
        case.write_input(b"in").unwrap();
        case.write_answer(b"out").unwrap();
        let input = case.input_file().to_path_buf();
        case.remove().unwrap();
        assert!(!input.exists());
    }
}
