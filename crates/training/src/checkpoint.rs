use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{Pfld, PfldConfig};
use serde::{Deserialize, Serialize};

/// File locations for one epoch's checkpoint. The recorder appends its own
/// `.bin` extension to the weight stems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub meta: PathBuf,
    pub backbone: PathBuf,
    pub auxiliary: PathBuf,
}

impl CheckpointPaths {
    /// Deterministic function of the snapshot directory and epoch index.
    pub fn for_epoch(dir: &Path, epoch: usize) -> Self {
        Self {
            meta: dir.join(format!("checkpoint_epoch_{epoch}.json")),
            backbone: dir.join(format!("checkpoint_epoch_{epoch}_backbone")),
            auxiliary: dir.join(format!("checkpoint_epoch_{epoch}_auxiliary")),
        }
    }

    /// Derive the sibling weight stems from a meta JSON path.
    pub fn from_meta(meta: &Path) -> anyhow::Result<Self> {
        let stem = meta
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("checkpoint meta path has no file stem: {meta:?}"))?;
        let dir = meta.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            meta: meta.to_path_buf(),
            backbone: dir.join(format!("{stem}_backbone")),
            auxiliary: dir.join(format!("{stem}_auxiliary")),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointMeta {
    epoch: usize,
}

/// Persist the epoch index and both parameter collections. Written once per
/// epoch; any failure is fatal to the run.
pub fn save<B: Backend>(dir: &Path, epoch: usize, model: &Pfld<B>) -> anyhow::Result<CheckpointPaths> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;
    let paths = CheckpointPaths::for_epoch(dir, epoch);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .backbone
        .clone()
        .save_file(paths.backbone.clone(), &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save backbone checkpoint: {e}"))?;
    model
        .auxiliary
        .clone()
        .save_file(paths.auxiliary.clone(), &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save auxiliary checkpoint: {e}"))?;
    let meta = serde_json::to_vec(&CheckpointMeta { epoch })?;
    fs::write(&paths.meta, &meta)
        .with_context(|| format!("failed to write {}", paths.meta.display()))?;
    fs::write(dir.join("latest.json"), &meta)
        .with_context(|| format!("failed to update latest.json in {}", dir.display()))?;
    Ok(paths)
}

/// Restore both modules from a checkpoint's meta JSON path. Returns the
/// epoch recorded at save time alongside the model.
pub fn load<B: Backend>(
    meta_path: &Path,
    cfg: &PfldConfig,
    device: &B::Device,
) -> anyhow::Result<(usize, Pfld<B>)> {
    let meta: CheckpointMeta = serde_json::from_slice(
        &fs::read(meta_path)
            .with_context(|| format!("failed to read checkpoint meta {}", meta_path.display()))?,
    )
    .with_context(|| format!("invalid checkpoint meta {}", meta_path.display()))?;
    let paths = CheckpointPaths::from_meta(meta_path)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();

    let fresh = Pfld::<B>::new(cfg, device);
    let backbone = fresh
        .backbone
        .load_file(paths.backbone.clone(), &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load backbone checkpoint: {e}"))?;
    let auxiliary = fresh
        .auxiliary
        .load_file(paths.auxiliary.clone(), &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load auxiliary checkpoint: {e}"))?;
    Ok((
        meta.epoch,
        Pfld {
            backbone,
            auxiliary,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic_in_dir_and_epoch() {
        let a = CheckpointPaths::for_epoch(Path::new("snap"), 7);
        let b = CheckpointPaths::for_epoch(Path::new("snap"), 7);
        assert_eq!(a, b);
        assert_eq!(a.meta, Path::new("snap/checkpoint_epoch_7.json"));
        assert_eq!(a.backbone, Path::new("snap/checkpoint_epoch_7_backbone"));
        assert_eq!(a.auxiliary, Path::new("snap/checkpoint_epoch_7_auxiliary"));

        let other = CheckpointPaths::for_epoch(Path::new("snap"), 8);
        assert_ne!(a, other);
    }

    #[test]
    fn meta_path_derives_weight_stems() {
        let paths =
            CheckpointPaths::from_meta(Path::new("snap/checkpoint_epoch_42.json")).unwrap();
        assert_eq!(paths, CheckpointPaths::for_epoch(Path::new("snap"), 42));
    }
}
