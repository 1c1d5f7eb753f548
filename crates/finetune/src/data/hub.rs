//! Hugging Face datasets-server download
//!
//! Europarl is stored as parquet on the hub; the datasets-server exposes the
//! same rows as JSON pages, which is all a fixed-size sample needs.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::jsonl::{pair_from_record, write_pairs, JsonlSource};
use super::split::sample;
use super::{TranslationPair, TranslationSource};
use crate::config::DataConfig;

pub const DEFAULT_ENDPOINT: &str = "https://datasets-server.huggingface.co";
/// The rows API never returns more than 100 rows per request.
pub const PAGE_SIZE: usize = 100;
const MAX_RETRIES: u32 = 5;

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    num_rows_total: usize,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row_idx: usize,
    row: Value,
}

pub struct HubRowsSource {
    pub endpoint: String,
    pub dataset: String,
    pub config: String,
    pub split: String,
    pub source_lang: String,
    pub target_lang: String,
    pub sample_size: usize,
    pub seed: u64,
    pub cache_dir: PathBuf,
}

impl HubRowsSource {
    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            endpoint: std::env::var("HF_DATASETS_SERVER")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            dataset: config.dataset.clone(),
            config: config.dataset_config.clone(),
            split: config.dataset_split.clone(),
            source_lang: config.source_lang.clone(),
            target_lang: config.target_lang.clone(),
            sample_size: config.sample_size,
            seed: config.seed,
            cache_dir: config.cache_dir.clone(),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        let name = format!(
            "{}__{}__{}__seed{}__n{}.jsonl",
            self.dataset.replace('/', "--"),
            self.config,
            self.split,
            self.seed,
            self.sample_size
        );
        self.cache_dir.join(name)
    }

    fn fetch_page(&self, offset: usize) -> Result<RowsPage> {
        let url = format!("{}/rows", self.endpoint.trim_end_matches('/'));
        let mut attempt = 0;
        loop {
            let request = ureq::get(&url)
                .query("dataset", &self.dataset)
                .query("config", &self.config)
                .query("split", &self.split)
                .query("offset", &offset.to_string())
                .query("length", &PAGE_SIZE.to_string())
                .timeout(Duration::from_secs(60));

            match request.call() {
                Ok(resp) => {
                    let page: RowsPage = serde_json::from_reader(resp.into_reader())
                        .with_context(|| format!("Malformed rows page at offset {offset}"))?;
                    return Ok(page);
                }
                Err(ureq::Error::Status(code, _)) if is_transient(code) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let wait = Duration::from_secs(1 << attempt);
                    warn!("⚠️ HTTP {} at offset {}, retrying in {:?}", code, offset, wait);
                    std::thread::sleep(wait);
                }
                Err(ureq::Error::Transport(e)) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let wait = Duration::from_secs(1 << attempt);
                    warn!("⚠️ {} at offset {}, retrying in {:?}", e, offset, wait);
                    std::thread::sleep(wait);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to fetch {} rows at offset {}", self.dataset, offset)
                    })
                }
            }
        }
    }

    fn download(&self) -> Result<Vec<TranslationPair>> {
        info!(
            "📥 Sampling {} rows of {}/{} [{}] (seed {})",
            self.sample_size, self.dataset, self.config, self.split, self.seed
        );
        let first = self.fetch_page(0)?;
        let total = first.num_rows_total;
        if total == 0 {
            anyhow::bail!("{} has no rows in split '{}'", self.dataset, self.split);
        }
        let offsets = plan_pages(total, self.sample_size, PAGE_SIZE, self.seed);
        debug!("{} rows total, fetching {} page(s)", total, offsets.len());

        let pb = ProgressBar::new(offsets.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({eta})")?
                .progress_chars("#>-"),
        );

        let mut first = Some(first);
        let mut pairs = Vec::with_capacity(offsets.len() * PAGE_SIZE);
        for offset in offsets {
            let page = match first.take() {
                Some(page) if offset == 0 => page,
                other => {
                    first = other;
                    self.fetch_page(offset)?
                }
            };
            for entry in page.rows {
                let pair = pair_from_record(&entry.row, &self.source_lang, &self.target_lang)
                    .with_context(|| format!("{} row {}", self.dataset, entry.row_idx))?;
                pairs.push(pair);
            }
            pb.inc(1);
        }
        pb.finish_with_message("Download complete");

        Ok(sample(pairs, self.sample_size, self.seed))
    }
}

impl TranslationSource for HubRowsSource {
    fn describe(&self) -> String {
        format!("{}/{} [{}]", self.dataset, self.config, self.split)
    }

    fn load(&self) -> Result<Vec<TranslationPair>> {
        let cache = self.cache_path();
        if cache.exists() {
            info!("📂 Using cached sample: {}", cache.display());
            return JsonlSource::new(&cache, &self.source_lang, &self.target_lang).load();
        }

        let pairs = self.download()?;
        store_cache(&cache, &pairs, &self.source_lang, &self.target_lang)?;
        Ok(pairs)
    }
}

fn is_transient(code: u16) -> bool {
    code == 429 || (500..600).contains(&code)
}

fn store_cache(path: &Path, pairs: &[TranslationPair], source_lang: &str, target_lang: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Written under a temporary name so an interrupted run never leaves a short cache.
    let tmp = path.with_extension("jsonl.part");
    write_pairs(&tmp, pairs, source_lang, target_lang)?;
    std::fs::rename(&tmp, path)?;
    info!("✅ Cached {} pairs to {}", pairs.len(), path.display());
    Ok(())
}

/// Row offsets of the pages to fetch: a seeded random choice of pages,
/// without replacement, covering at least `sample_size` rows (or all of them).
///
/// Whole pages are drawn, so the sample is clustered: a 10k sample from
/// 100-row pages is 100 runs of consecutive sentences, not 10k independent
/// rows. The final shuffle only reorders them.
pub fn plan_pages(total_rows: usize, sample_size: usize, page_size: usize, seed: u64) -> Vec<usize> {
    let n_pages = total_rows.div_ceil(page_size);
    let mut pages: Vec<usize> = (0..n_pages).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    pages.shuffle(&mut rng);

    let mut covered = 0;
    let mut offsets = Vec::new();
    for page in pages {
        if covered >= sample_size {
            break;
        }
        let offset = page * page_size;
        covered += page_size.min(total_rows - offset);
        offsets.push(offset);
    }
    offsets
}
