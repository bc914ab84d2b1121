use anyhow::{Context, Result};
use clap::ValueEnum;
use govtag_core::Ingest;
use serde::Deserialize;
use std::path::Path;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat { #[default] Json, Pretty }

/// Settings file (YAML). Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub concurrency: usize,
    pub ingest: Ingest,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self { Self { concurrency: 4, ingest: Ingest::Strict, log_format: LogFormat::Json } }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else { return Ok(Self::default()) };
        let raw = std::fs::read(path).with_context(|| format!("read settings {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parse settings {}", path.display()))
    }

    pub fn from_yaml(raw: &[u8]) -> Result<Self> {
        let s: Settings = serde_yaml::from_slice(raw)?;
        if s.concurrency == 0 { anyhow::bail!("concurrency must be at least 1") }
        Ok(s)
    }
}
