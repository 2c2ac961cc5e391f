use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domains::conversation::ConversationWindow;
use crate::error::Result;
use crate::index::SchemaIndex;
use crate::interfaces::providers::{LlmProvider, SchemaConnection};
use crate::validator::{OperationTier, SqlValidator};

const INVALID_QUERY_SENTINEL: &str = "INVALID_QUERY";

const GENERATION_SYSTEM_TEMPLATE: &str = "You are a SQL expert. Given the following database schema and user question, \
first verify that the question can be answered using ONLY the tables shown below.
If not, respond with exactly 'INVALID_QUERY'.

Schema information:
{schema}

Rules:
1. Only use tables and columns exactly as named in the schema above
2. Generate raw SQL without any formatting or code blocks
3. If the tables needed are not in the schema, return 'INVALID_QUERY'";

const NARRATION_SYSTEM_TEMPLATE: &str = "Given the following SQL query results and the original question, \
generate a natural language response that answers the user's question in a clear and concise way.

Original question: {question}
Results: {results}";

const NARRATION_PROMPT: &str = "Please provide a natural language summary of these results.";

/// Caller-facing result of one question. The original question's SQL, rows,
/// and error text are preserved even on failure so a caller can show what
/// was attempted.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_rows: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    fn failure(error: impl Into<String>, sql: Option<String>) -> Self {
        Self {
            success: false,
            response: None,
            sql,
            raw_rows: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub threshold: f32,
    pub table_min_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            threshold: 0.25,
            table_min_score: 0.25,
        }
    }
}

/// Retrieval-generation-execution orchestrator. One question runs
/// RETRIEVE → GENERATE → VALIDATE → EXECUTE → NARRATE start to finish on the
/// calling task; every failure becomes a value, never a panic or an error
/// escaping the boundary.
pub struct ChatbotService {
    llm: Arc<dyn LlmProvider>,
    connection: Arc<dyn SchemaConnection>,
    index: Arc<SchemaIndex>,
    validator: SqlValidator,
    dialect_check: bool,
    retrieval: RetrievalSettings,
    window: Mutex<ConversationWindow>,
}

impl ChatbotService {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        connection: Arc<dyn SchemaConnection>,
        index: Arc<SchemaIndex>,
        validator: SqlValidator,
        dialect_check: bool,
        retrieval: RetrievalSettings,
    ) -> Self {
        Self {
            llm,
            connection,
            index,
            validator,
            dialect_check,
            retrieval,
            window: Mutex::new(ConversationWindow::default()),
        }
    }

    pub async fn ask(&self, question: &str) -> QueryOutcome {
        match self.run(question).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "query pipeline failed");
                QueryOutcome::failure(e.to_string(), None)
            }
        }
    }

    pub async fn clear_conversation(&self) {
        self.window.lock().await.clear();
    }

    pub async fn conversation_len(&self) -> usize {
        self.window.lock().await.len()
    }

    async fn run(&self, question: &str) -> Result<QueryOutcome> {
        // RETRIEVE
        let Some(schema_context) = self.retrieve(question).await? else {
            info!("no schema context retrieved for question");
            return Ok(QueryOutcome::failure(
                "No relevant tables found in the database schema for this question.",
                None,
            ));
        };

        // GENERATE
        let raw = self
            .llm
            .generate_text(
                &self.generation_prompt(question).await,
                &GENERATION_SYSTEM_TEMPLATE.replace("{schema}", &schema_context),
            )
            .await?;
        let sql = strip_code_fences(&raw);
        debug!(sql = %sql, "generated SQL candidate");

        if sql == INVALID_QUERY_SENTINEL {
            return Ok(QueryOutcome::failure(
                "The question cannot be answered using the available database schema.",
                None,
            ));
        }
        if !sql.to_uppercase().starts_with("SELECT") {
            return Ok(QueryOutcome::failure(
                "The model did not produce a SELECT statement; nothing was executed.",
                Some(sql),
            ));
        }

        // VALIDATE
        let mut verdict = self.validator.validate(&sql, OperationTier::Query);
        if verdict.is_valid && self.dialect_check {
            verdict = self.validator.dialect_check(&sql);
        }
        if !verdict.is_valid {
            return Ok(QueryOutcome::failure(
                format!("SQL validation failed: {}", verdict.message),
                Some(sql),
            ));
        }

        // EXECUTE
        let rows = match self.connection.fetch_rows(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                return Ok(QueryOutcome::failure(e.to_string(), Some(sql)));
            }
        };
        info!(statement = %sql, rows = rows.len(), "query executed");

        // NARRATE
        let narration = match self.narrate(question, &rows).await {
            Ok(narration) => narration,
            Err(e) => {
                // The query itself already succeeded; only the summary is
                // missing.
                return Ok(QueryOutcome {
                    success: false,
                    response: None,
                    sql: Some(sql),
                    raw_rows: Some(rows),
                    error: Some(format!("Result summary failed after execution: {e}")),
                });
            }
        };

        // DONE
        self.window
            .lock()
            .await
            .push(question.to_string(), narration.clone());

        Ok(QueryOutcome {
            success: true,
            response: Some(narration),
            sql: Some(sql),
            raw_rows: Some(rows),
            error: None,
        })
    }

    /// Merge table-level and whole-text matches, deduplicating by table with
    /// table-level matches taking priority. Returns `None` when nothing
    /// relevant was found.
    async fn retrieve(&self, question: &str) -> Result<Option<String>> {
        let table_hits = self
            .index
            .table_search(question, self.retrieval.table_min_score)
            .await?;
        let text_hits = self
            .index
            .search(question, self.retrieval.top_k, self.retrieval.threshold)
            .await?;

        let mut seen_tables: Vec<String> = Vec::new();
        let mut blocks: Vec<String> = Vec::new();
        for hit in table_hits {
            seen_tables.push(hit.table.clone());
            blocks.push(hit.description);
        }
        for hit in text_hits {
            if seen_tables.iter().any(|t| t == &hit.metadata.table) {
                continue;
            }
            seen_tables.push(hit.metadata.table.clone());
            blocks.push(hit.text);
        }

        if blocks.is_empty() {
            return Ok(None);
        }
        debug!(tables = seen_tables.len(), "retrieved schema context");
        Ok(Some(blocks.join("\n")))
    }

    async fn generation_prompt(&self, question: &str) -> String {
        let window = self.window.lock().await;
        if window.is_empty() {
            return question.to_string();
        }
        format!("PRIOR TURNS:\n{}\n\n{}", window.render(), question)
    }

    async fn narrate(&self, question: &str, rows: &[Value]) -> Result<String> {
        let results = serde_json::to_string(rows)
            .map_err(|e| crate::error::TableTalkError::Serialization(e.to_string()))?;
        let system = NARRATION_SYSTEM_TEMPLATE
            .replace("{question}", question)
            .replace("{results}", &results);
        self.llm.generate_text(NARRATION_PROMPT, &system).await
    }
}

/// Strip markdown fencing and stray backticks from model output.
pub(crate) fn strip_code_fences(text: &str) -> String {
    text.replace("```sql", "")
        .replace("```", "")
        .replace('`', "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sql_fences_and_backticks() {
        let raw = "```sql\nSELECT * FROM t\n```";
        assert_eq!(strip_code_fences(raw), "SELECT * FROM t");
        assert_eq!(strip_code_fences("`SELECT 1`"), "SELECT 1");
        assert_eq!(strip_code_fences("  SELECT 1  "), "SELECT 1");
    }
}
