//! Translation data: sources, sampling, splitting and prompt rendering

pub mod hub;
pub mod jsonl;
pub mod split;
pub mod template;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DataConfig;

pub use hub::HubRowsSource;
pub use jsonl::JsonlSource;
pub use split::{sample, split_train_test, DatasetSplit};
pub use template::{FormattedExample, PromptTemplate};

/// One source sentence and its reference translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationPair {
    pub source: String,
    pub target: String,
}

impl TranslationPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Anything that can hand out a list of translation pairs.
pub trait TranslationSource {
    fn describe(&self) -> String;
    fn load(&self) -> Result<Vec<TranslationPair>>;
}

/// The training source selected by `config`: a local file when
/// `--train_data` is given, otherwise the hub dataset.
pub fn source_for(config: &DataConfig) -> Box<dyn TranslationSource> {
    match &config.train_data {
        Some(path) => Box::new(JsonlSource::new(
            path,
            &config.source_lang,
            &config.target_lang,
        )),
        None => Box::new(HubRowsSource::from_config(config)),
    }
}

/// Loads pairs from `source`, draws a seeded sample of at most `sample_size`,
/// splits and renders.
///
/// With `eval_data` set the eval file becomes the test partition and the
/// loaded training pairs are used as-is.
pub fn prepare(
    source: &dyn TranslationSource,
    config: &DataConfig,
    template: &PromptTemplate,
) -> Result<DatasetSplit<FormattedExample>> {
    info!("📥 Loading translation pairs from {}", source.describe());
    let mut pairs = source.load()?;
    if pairs.is_empty() {
        anyhow::bail!("{} returned no translation pairs", source.describe());
    }
    if pairs.len() > config.sample_size {
        pairs = sample(pairs, config.sample_size, config.seed);
    }

    let split = match &config.eval_data {
        Some(eval_path) => {
            let eval = JsonlSource::new(eval_path, &config.source_lang, &config.target_lang);
            info!("📥 Loading evaluation pairs from {}", eval.describe());
            DatasetSplit {
                train: pairs,
                test: eval.load()?,
            }
        }
        None => split_train_test(pairs, config.test_fraction, config.seed)?,
    };

    if split.train.is_empty() {
        anyhow::bail!("training partition is empty");
    }
    info!(
        "✅ Split: {} train / {} test pairs",
        split.train.len(),
        split.test.len()
    );

    Ok(DatasetSplit {
        train: template.render_all(&split.train)?,
        test: template.render_all(&split.test)?,
    })
}
