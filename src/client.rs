use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::domains::history::HistoryEntry;
use crate::domains::schema::SchemaDescription;
use crate::error::Result;
use crate::factories::chat_factory::{TableTalkFactory, TableTalkParts};
use crate::index::{ProgressCallback, SchemaIndex};
use crate::interfaces::providers::SchemaConnection;
use crate::services::assistant::{MutationOutcome, SchemaAssistant};
use crate::services::chatbot::{ChatbotService, QueryOutcome};

/// Facade over the query pipeline and the schema mutation assistant for one
/// database.
pub struct TableTalk {
    chatbot: ChatbotService,
    assistant: SchemaAssistant,
    index: Arc<SchemaIndex>,
    connection: Arc<dyn SchemaConnection>,
}

impl TableTalk {
    pub async fn from_config(config: Config) -> Result<Self> {
        let TableTalkParts {
            chatbot,
            assistant,
            index,
            connection,
        } = TableTalkFactory::create_from_config(config).await?;
        Ok(Self {
            chatbot,
            assistant,
            index,
            connection,
        })
    }

    pub async fn from_config_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::from_file(path)?;
        Self::from_config(config).await
    }

    /// Current normalized schema, introspected fresh.
    pub async fn schema(&self) -> Result<SchemaDescription> {
        self.connection.snapshot().await
    }

    /// Rebuild the embedding index only when it is missing or stale.
    /// Returns true when a rebuild happened.
    pub async fn ensure_index(&self, progress: Option<&ProgressCallback>) -> Result<bool> {
        let schema = self.connection.snapshot().await?;
        if !self.index.is_stale(&schema).await? {
            return Ok(false);
        }
        self.index.build(&schema, progress).await?;
        Ok(true)
    }

    /// Unconditionally rebuild the embedding index from the live schema.
    pub async fn rebuild_index(&self, progress: Option<&ProgressCallback>) -> Result<()> {
        let schema = self.connection.snapshot().await?;
        self.index.build(&schema, progress).await
    }

    /// Ask a natural-language question; runs the full
    /// retrieve-generate-validate-execute-narrate pipeline.
    pub async fn ask(&self, question: &str) -> QueryOutcome {
        self.chatbot.ask(question).await
    }

    /// Apply a natural-language schema change through the mutation
    /// assistant.
    pub async fn modify(&self, instruction: &str) -> MutationOutcome {
        self.assistant.process(instruction).await
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.assistant.history()
    }

    pub fn clear_history(&self) -> Result<()> {
        self.assistant.clear_history()
    }

    pub async fn clear_conversation(&self) {
        self.chatbot.clear_conversation().await
    }

    /// Drop everything this client persisted for the schema namespace: the
    /// index trio and the history log. The database itself is untouched.
    pub async fn teardown(&self) -> Result<()> {
        self.index.delete().await?;
        self.assistant.cleanup()?;
        Ok(())
    }
}
