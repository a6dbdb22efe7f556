use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::config::Language;

const EN: &str = include_str!("../lang/en.json");
const DE: &str = include_str!("../lang/de.json");

/// Localized text lookup injected into every stage.
pub trait Translate: Send + Sync {
    /// Return the text for `key`, or the key itself when nothing matches.
    fn translate(&self, key: &str) -> String;

    /// Translate and substitute `{name}` placeholders.
    fn translate_with(&self, key: &str, args: &[(&str, &str)]) -> String {
        let mut text = self.translate(key);
        for (name, value) in args {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        text
    }
}

/// Bundled catalog: the requested language merged over English.
#[derive(Debug, Clone)]
pub struct Catalog {
    language: Language,
    entries: HashMap<String, String>,
}

impl Catalog {
    pub fn new(language: Language) -> Result<Self> {
        let overlay = match language {
            Language::En => None,
            other => Some(source(other)),
        };
        Self::merged(language, EN, overlay)
    }

    fn merged(language: Language, base: &str, overlay: Option<&str>) -> Result<Self> {
        let mut entries = parse(base).context("failed to parse bundled en catalog")?;
        if let Some(overlay) = overlay {
            let overlay = parse(overlay)
                .with_context(|| format!("failed to parse bundled {} catalog", language.code()))?;
            entries.extend(overlay);
        }
        tracing::debug!(language = language.code(), keys = entries.len(), "loaded catalog");
        Ok(Self { language, entries })
    }

    pub fn language(&self) -> Language {
        self.language
    }
}

impl Translate for Catalog {
    fn translate(&self, key: &str) -> String {
        self.entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

fn source(language: Language) -> &'static str {
    match language {
        Language::En => EN,
        Language::De => DE,
    }
}

fn parse(raw: &str) -> Result<HashMap<String, String>> {
    Ok(serde_json::from_str(raw)?)
}
