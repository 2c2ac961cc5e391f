use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, TableTalkError};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub schema_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    pub model: Option<String>,
    pub fallback_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
    pub table_min_score: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub embedding: Option<EmbeddingConfig>,
    pub index: Option<IndexConfig>,
    pub history: Option<HistoryConfig>,
    pub retrieval: Option<RetrievalConfig>,
    pub dialect: Option<String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| TableTalkError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| TableTalkError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Namespace used for the index directory and the history file. Falls
    /// back to the database file stem when no explicit name is configured.
    pub fn schema_name(&self) -> String {
        if let Some(name) = &self.database.schema_name {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
        Path::new(&self.database.path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("default")
            .to_string()
    }
}
