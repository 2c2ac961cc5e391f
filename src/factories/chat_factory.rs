use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, TableTalkError};
use crate::index::SchemaIndex;
use crate::interfaces::providers::{LlmProvider, SchemaConnection};
use crate::providers::history::FileHistoryStore;
use crate::providers::openai::OpenAiProvider;
use crate::providers::sqlite::SqliteSchemaConnection;
use crate::services::assistant::SchemaAssistant;
use crate::services::chatbot::{ChatbotService, RetrievalSettings};
use crate::validator::{SqlDialect, SqlValidator};

const DEFAULT_INDEX_DIR: &str = "./vector_store";
const DEFAULT_HISTORY_DIR: &str = "./schema_history";

/// Base URL, default model, and default temperature for one named LLM
/// provider. Resolved once at construction, not per call.
struct ProviderProfile {
    base_url: Option<&'static str>,
    model: &'static str,
    temperature: f32,
}

fn provider_profile(name: &str) -> Result<ProviderProfile> {
    match name {
        "openai" => Ok(ProviderProfile {
            base_url: None,
            model: "gpt-4o-mini",
            temperature: 0.1,
        }),
        "sambanova" => Ok(ProviderProfile {
            base_url: Some("https://api.sambanova.ai/v1"),
            model: "Meta-Llama-3.3-70B-Instruct",
            temperature: 0.1,
        }),
        "gemini" => Ok(ProviderProfile {
            base_url: Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            model: "gemini-2.5-flash",
            temperature: 0.2,
        }),
        other => Err(TableTalkError::Config(format!(
            "Unsupported LLM provider: {other}"
        ))),
    }
}

/// Services wired from a `Config`, consumed by the `TableTalk` client.
pub struct TableTalkParts {
    pub chatbot: ChatbotService,
    pub assistant: SchemaAssistant,
    pub index: Arc<SchemaIndex>,
    pub connection: Arc<dyn SchemaConnection>,
}

pub struct TableTalkFactory;

impl TableTalkFactory {
    pub async fn create_from_config(config: Config) -> Result<TableTalkParts> {
        let schema_name = config.schema_name();

        let profile = provider_profile(config.llm.provider.as_deref().unwrap_or("openai"))?;
        let api_key = config
            .llm
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| TableTalkError::Config("Missing LLM API key".to_string()))?;
        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
            api_key,
            config
                .llm
                .model
                .clone()
                .or_else(|| Some(profile.model.to_string())),
            config
                .llm
                .base_url
                .clone()
                .or_else(|| profile.base_url.map(|url| url.to_string())),
            Some(config.llm.temperature.unwrap_or(profile.temperature)),
        ));

        let connection: Arc<dyn SchemaConnection> =
            Arc::new(SqliteSchemaConnection::new(config.database.path.clone()).await?);

        let embedding = config.embedding.clone();
        let index_dir = PathBuf::from(
            config
                .index
                .as_ref()
                .and_then(|index| index.dir.clone())
                .unwrap_or_else(|| DEFAULT_INDEX_DIR.to_string()),
        )
        .join(&schema_name);
        let index = Arc::new(SchemaIndex::open(
            index_dir,
            llm.clone(),
            embedding.as_ref().and_then(|e| e.model.clone()),
            embedding.as_ref().and_then(|e| e.fallback_model.clone()),
        )?);

        let dialect = SqlDialect::from_name(config.dialect.as_deref().unwrap_or("sqlite"));
        let validator = SqlValidator::new(dialect);
        let dialect_check = dialect == SqlDialect::MySql;

        let retrieval = config
            .retrieval
            .as_ref()
            .map(|r| {
                let defaults = RetrievalSettings::default();
                RetrievalSettings {
                    top_k: r.top_k.unwrap_or(defaults.top_k),
                    threshold: r.threshold.unwrap_or(defaults.threshold),
                    table_min_score: r.table_min_score.unwrap_or(defaults.table_min_score),
                }
            })
            .unwrap_or_default();

        let chatbot = ChatbotService::new(
            llm.clone(),
            connection.clone(),
            index.clone(),
            validator.clone(),
            dialect_check,
            retrieval,
        );

        let history_dir = config
            .history
            .as_ref()
            .and_then(|history| history.dir.clone())
            .unwrap_or_else(|| DEFAULT_HISTORY_DIR.to_string());
        let history = FileHistoryStore::new(history_dir, &schema_name)?;
        let assistant = SchemaAssistant::new(
            llm,
            connection.clone(),
            validator,
            dialect_check,
            dialect.display_name().to_string(),
            history,
        );

        Ok(TableTalkParts {
            chatbot,
            assistant,
            index,
            connection,
        })
    }
}
