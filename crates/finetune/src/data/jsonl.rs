use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{TranslationPair, TranslationSource};

/// JSON-lines file of translation records.
///
/// Accepts the Hugging Face export layout `{"translation": {"en": .., "fi": ..}}`
/// as well as flat `{"en": .., "fi": ..}` objects.
pub struct JsonlSource {
    path: PathBuf,
    source_lang: String,
    target_lang: String,
}

impl JsonlSource {
    pub fn new(path: impl AsRef<Path>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        }
    }
}

impl TranslationSource for JsonlSource {
    fn describe(&self) -> String {
        format!("{}", self.path.display())
    }

    fn load(&self) -> Result<Vec<TranslationPair>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open data file '{}'", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut pairs = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(&line).with_context(|| {
                format!("{}:{}: invalid JSON", self.path.display(), idx + 1)
            })?;
            let pair = pair_from_record(&record, &self.source_lang, &self.target_lang)
                .with_context(|| format!("{}:{}", self.path.display(), idx + 1))?;
            pairs.push(pair);
        }
        Ok(pairs)
    }
}

/// Extracts a pair from either record layout; both languages must be strings.
pub fn pair_from_record(record: &Value, source_lang: &str, target_lang: &str) -> Result<TranslationPair> {
    let fields = record.get("translation").unwrap_or(record);
    let field = |lang: &str| -> Result<String> {
        fields
            .get(lang)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("record has no '{lang}' text"))
    };
    Ok(TranslationPair {
        source: field(source_lang)?,
        target: field(target_lang)?,
    })
}

/// Writes pairs in the Hugging Face export layout.
pub fn write_pairs(path: &Path, pairs: &[TranslationPair], source_lang: &str, target_lang: &str) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Cannot create '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    for pair in pairs {
        let mut translation = serde_json::Map::new();
        translation.insert(source_lang.to_string(), Value::from(pair.source.as_str()));
        translation.insert(target_lang.to_string(), Value::from(pair.target.as_str()));
        let record = serde_json::json!({ "translation": translation });
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_layouts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pairs.jsonl");
        std::fs::write(
            &path,
            "{\"translation\": {\"en\": \"Hello\", \"fi\": \"Hei\"}}\n\n{\"en\": \"Yes\", \"fi\": \"Kyllä\"}\n",
        )?;
        let pairs = JsonlSource::new(&path, "en", "fi").load()?;
        assert_eq!(
            pairs,
            vec![TranslationPair::new("Hello", "Hei"), TranslationPair::new("Yes", "Kyllä")]
        );
        Ok(())
    }

    #[test]
    fn missing_language_names_the_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"en\": \"a\", \"fi\": \"b\"}\n{\"en\": \"only english\"}\n")?;
        let err = JsonlSource::new(&path, "en", "fi").load().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains(":2"), "{msg}");
        assert!(msg.contains("'fi'"), "{msg}");
        Ok(())
    }

    #[test]
    fn invalid_json_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{not json}\n")?;
        assert!(JsonlSource::new(&path, "en", "fi").load().is_err());
        Ok(())
    }

    #[test]
    fn written_pairs_read_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cache.jsonl");
        let pairs = vec![TranslationPair::new("one", "yksi")];
        write_pairs(&path, &pairs, "en", "fi")?;
        assert_eq!(JsonlSource::new(&path, "en", "fi").load()?, pairs);
        Ok(())
    }
}
