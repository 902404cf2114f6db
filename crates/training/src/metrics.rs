use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

/// Scalar series for one epoch, appended to the JSONL sink for external
/// plotting. No in-process consumer exists.
#[derive(Debug, Clone, Serialize)]
pub struct EpochScalars {
    pub epoch: usize,
    pub weighted_train_loss: f64,
    pub train_loss: f64,
    pub val_loss: f64,
    pub lr: f64,
}

/// Append-only JSONL sink under the configured metrics directory.
#[derive(Debug)]
pub struct ScalarLog {
    path: PathBuf,
}

impl ScalarLog {
    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create metrics directory {}", dir.display()))?;
        Ok(Self {
            path: dir.join("scalars.jsonl"),
        })
    }

    pub fn append(&self, scalars: &EpochScalars) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(scalars)?)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
