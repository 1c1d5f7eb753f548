//! Locates `config.json`, `tokenizer.json` and the safetensors shards of a model,
//! either in a local directory or in a Hugging Face hub repository.

use anyhow::{Context, Result};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS: &str = "model.safetensors";
const WEIGHTS_INDEX: &str = "model.safetensors.index.json";

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct WeightsIndex {
    weight_map: HashMap<String, String>,
}

impl ModelFiles {
    /// `id` is a local directory when one exists at that path, a hub repo id otherwise.
    pub fn resolve(id: &str, revision: &str) -> Result<Self> {
        let dir = Path::new(id);
        if dir.is_dir() {
            info!("📂 Using local model directory: {}", dir.display());
            return Self::from_dir(dir);
        }
        Self::from_hub(id, revision)
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::collect(
            |name| dir.join(name).exists(),
            |name| {
                let path = dir.join(name);
                if path.exists() {
                    Ok(path)
                } else {
                    anyhow::bail!("missing {name}")
                }
            },
        )
        .with_context(|| format!("Incomplete model directory '{}'", dir.display()))
    }

    pub fn from_hub(id: &str, revision: &str) -> Result<Self> {
        info!("📥 Fetching {} @ {} from the Hugging Face hub", id, revision);
        let api = Api::new().map_err(|e| anyhow::anyhow!("HF API: {}", e))?;
        let repo = api.repo(Repo::with_revision(
            id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));
        let listing: HashSet<String> = repo
            .info()
            .map_err(|e| anyhow::anyhow!("Cannot list {id}: {e}"))?
            .siblings
            .into_iter()
            .map(|s| s.rfilename)
            .collect();

        Self::collect(
            |name| listing.contains(name),
            |name| {
                repo.get(name)
                    .map_err(|e| anyhow::anyhow!("Download of {name} failed: {e}"))
            },
        )
        .with_context(|| format!("Cannot resolve model '{id}'"))
    }

    fn collect<H, F>(has: H, fetch: F) -> Result<Self>
    where
        H: Fn(&str) -> bool,
        F: Fn(&str) -> Result<PathBuf>,
    {
        let config = fetch(CONFIG_FILE)?;
        let tokenizer = fetch(TOKENIZER_FILE)?;

        let weights = if has(WEIGHTS_INDEX) {
            shard_names(&fetch(WEIGHTS_INDEX)?)?
                .iter()
                .map(|shard| fetch(shard.as_str()))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![fetch(SINGLE_WEIGHTS)?]
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

/// Distinct shard file names listed by a `model.safetensors.index.json`, sorted.
pub fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(index_path)
        .with_context(|| format!("Cannot read {}", index_path.display()))?;
    let index: WeightsIndex = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid weights index {}", index_path.display()))?;
    let shards: BTreeSet<String> = index.weight_map.into_values().collect();
    if shards.is_empty() {
        anyhow::bail!("{} lists no shards", index_path.display());
    }
    Ok(shards.into_iter().collect())
}
