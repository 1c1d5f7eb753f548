//! Prompt rendering
//!
//! The prompt prefix is a minijinja template receiving `source`; the target
//! sentence is appended verbatim right after it.

use anyhow::{Context, Result};
use minijinja::{context, Environment};

use super::TranslationPair;
use crate::config::DEFAULT_PROMPT_TEMPLATE;

/// Rendered training text and the byte offset where the response begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedExample {
    pub text: String,
    pub response_start: usize,
}

impl FormattedExample {
    pub fn prompt(&self) -> &str {
        &self.text[..self.response_start]
    }

    pub fn response(&self) -> &str {
        &self.text[self.response_start..]
    }
}

pub struct PromptTemplate {
    env: Environment<'static>,
    source: String,
}

impl PromptTemplate {
    pub fn new(template: &str) -> Result<Self> {
        if !template.contains("source") {
            anyhow::bail!("prompt template must reference {{{{ source }}}}: {template:?}");
        }
        let prompt = Self::with_source(template);
        prompt
            .env
            .template_from_str(&prompt.source)
            .with_context(|| format!("Invalid prompt template {template:?}"))?;
        Ok(prompt)
    }

    fn with_source(template: &str) -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        Self {
            env,
            source: template.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn render(&self, pair: &TranslationPair) -> Result<FormattedExample> {
        let tmpl = self.env.template_from_str(&self.source)?;
        let mut text = tmpl
            .render(context! { source => pair.source })
            .context("Failed to render prompt")?;
        let response_start = text.len();
        text.push_str(&pair.target);
        Ok(FormattedExample {
            text,
            response_start,
        })
    }

    pub fn render_all(&self, pairs: &[TranslationPair]) -> Result<Vec<FormattedExample>> {
        pairs.iter().map(|p| self.render(p)).collect()
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::with_source(DEFAULT_PROMPT_TEMPLATE)
    }
}

impl std::fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PromptTemplate").field(&self.source).finish()
    }
}
