//! Checkpoint Management - weights, trainer state and rotation

use anyhow::{Context, Result};
use candle_nn::VarMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const WEIGHTS_NAME: &str = "model.safetensors";
pub const STATE_NAME: &str = "trainer_state.json";

/// One row of the training log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub step: usize,
    pub epoch: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_loss: Option<f64>,
}

/// Trainer state written next to every checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: usize,
    pub epoch: f64,
    pub loss: Option<f64>,
    pub date: String,
    pub checkpoint: String,
    pub log_history: Vec<LogEntry>,
}

impl TrainerState {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open trainer state '{}'", path.display()))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Saves the VarMap while holding an exclusive lock on `{path}.lock`.
pub fn save_securely(varmap: &VarMap, path: &Path) -> Result<()> {
    let lock_path = path.with_extension("safetensors.lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap.save(path);
    lock_file.unlock()?;
    drop(lock_file);
    let _ = std::fs::remove_file(&lock_path);
    saved.with_context(|| format!("Failed to save weights to '{}'", path.display()))
}

/// Writes `checkpoint-{step}` directories and keeps at most `limit` of them
/// (0 keeps all).
pub struct CheckpointManager {
    output_dir: PathBuf,
    limit: usize,
    companions: Vec<PathBuf>,
    saved: Vec<PathBuf>,
}

impl CheckpointManager {
    pub fn new(output_dir: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            limit,
            companions: Vec::new(),
            saved: Vec::new(),
        }
    }

    /// Files copied verbatim into every checkpoint (model config, tokenizer).
    pub fn with_companions(mut self, files: Vec<PathBuf>) -> Self {
        self.companions = files;
        self
    }

    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    pub fn save(
        &mut self,
        varmap: &VarMap,
        global_step: usize,
        epoch: f64,
        loss: Option<f64>,
        log_history: &[LogEntry],
    ) -> Result<PathBuf> {
        let dir = self.output_dir.join(format!("checkpoint-{global_step}"));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create '{}'", dir.display()))?;

        save_securely(varmap, &dir.join(WEIGHTS_NAME))?;

        let state = TrainerState {
            global_step,
            epoch,
            loss,
            date: chrono::Local::now().to_rfc3339(),
            checkpoint: WEIGHTS_NAME.to_string(),
            log_history: log_history.to_vec(),
        };
        let file = File::create(dir.join(STATE_NAME))?;
        serde_json::to_writer_pretty(file, &state)?;

        for src in &self.companions {
            if let Some(name) = src.file_name() {
                std::fs::copy(src, dir.join(name))
                    .with_context(|| format!("Failed to copy '{}'", src.display()))?;
            }
        }

        info!("💾 Saved checkpoint: {}", dir.display());
        self.saved.push(dir.clone());
        self.rotate();
        Ok(dir)
    }

    fn rotate(&mut self) {
        if self.limit == 0 {
            return;
        }
        while self.saved.len() > self.limit {
            let oldest = self.saved.remove(0);
            match std::fs::remove_dir_all(&oldest) {
                Ok(()) => info!("🗑️ Rotated out {}", oldest.display()),
                Err(e) => warn!("⚠️ Failed to remove {}: {}", oldest.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarMap};

    fn varmap() -> Result<VarMap> {
        let varmap = VarMap::new();
        varmap.get((2, 2), "w", Init::Const(1.0), DType::F32, &Device::Cpu)?;
        Ok(varmap)
    }

    #[test]
    fn writes_weights_state_and_companions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = dir.path().join("config.json");
        std::fs::write(&config, "{}")?;

        let mut manager = CheckpointManager::new(dir.path().join("out"), 3).with_companions(vec![config]);
        let history = vec![LogEntry {
            step: 10,
            epoch: 0.5,
            loss: Some(1.25),
            ..Default::default()
        }];
        let path = manager.save(&varmap()?, 10, 0.5, Some(1.25), &history)?;

        assert!(path.ends_with("checkpoint-10"));
        assert!(path.join(WEIGHTS_NAME).exists());
        assert!(path.join("config.json").exists());
        assert!(!path.join("model.safetensors.lock").exists());

        let state = TrainerState::load(&path.join(STATE_NAME))?;
        assert_eq!(state.global_step, 10);
        assert_eq!(state.log_history, history);
        Ok(())
    }

    #[test]
    fn keeps_only_the_newest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let vm = varmap()?;
        let mut manager = CheckpointManager::new(dir.path(), 2);
        for step in [5, 10, 15] {
            manager.save(&vm, step, 0.0, None, &[])?;
        }
        assert!(!dir.path().join("checkpoint-5").exists());
        assert!(dir.path().join("checkpoint-10").exists());
        assert!(dir.path().join("checkpoint-15").exists());
        assert_eq!(manager.saved().len(), 2);
        Ok(())
    }
}
