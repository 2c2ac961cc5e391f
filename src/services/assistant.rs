use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domains::history::{HistoryEntry, Role};
use crate::error::Result;
use crate::interfaces::providers::{LlmProvider, SchemaConnection};
use crate::providers::history::FileHistoryStore;
use crate::validator::{OperationTier, SqlValidator};

const INVALID_REQUEST_SENTINEL: &str = "INVALID_REQUEST";

const DDL_SYSTEM_TEMPLATE: &str = "You are a database schema expert. Convert the user's natural language request \
into {dialect} DDL statements. Think ahead and anticipate the tables and relationships users will need. \
Return ONLY the SQL statements without any explanation or formatting.

Current Database Schema:
{schema}

Rules:
1. Always design using entity relationship modeling: separate tables for entities and relationships.
2. Only reference tables and columns that exist in the schema. Do not add excessive columns or tables.
3. Use appropriate data types and constraints; use ON DELETE CASCADE for foreign keys.
4. For ALTER TABLE, the table must already exist in the schema above.
5. For foreign keys, referenced tables and columns must exist.
6. Use exact column names as shown in the schema.
7. Each table and column must have a comment, using {dialect} comment syntax.
8. Return INVALID_REQUEST if the operation cannot be performed.
9. Each statement must end with a semicolon; one statement per SQL clause.
10. No markdown, no explanations, just SQL.

Example outputs:

1. CREATE TABLE persons (
    id INT PRIMARY KEY AUTO_INCREMENT COMMENT 'Unique identifier',
    name VARCHAR(255) NOT NULL COMMENT 'Person name'
) COMMENT = 'Stores person information';

2. CREATE TABLE staff_area_assignments (
    assignment_id INTEGER NOT NULL PRIMARY KEY COMMENT 'Unique identifier for staff area assignment',
    staff_id INTEGER COMMENT 'Maintenance staff ID',
    area_id INTEGER COMMENT 'Hospital area ID',
    FOREIGN KEY (staff_id) REFERENCES maintenance_staff(staff_id) ON DELETE CASCADE,
    FOREIGN KEY (area_id) REFERENCES hospital_areas(area_id) ON DELETE CASCADE
) COMMENT = 'Assignments of maintenance staff to hospital areas';

3. ALTER TABLE persons ADD COLUMN email VARCHAR(255) NOT NULL COMMENT 'Person email';

4. DROP TABLE persons;

5. TRUNCATE TABLE persons;";

static LINE_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)--.*$").unwrap());
static BLOCK_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static DDL_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(CREATE|ALTER|DROP|TRUNCATE|DELETE|INSERT|UPDATE)\s+(?:TABLE|FROM)?|COMMENT\s+ON")
        .unwrap()
});

/// Caller-facing result of one schema mutation request.
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MutationOutcome {
    fn failure(error: impl Into<String>, sql: Option<String>) -> Self {
        Self {
            success: false,
            message: None,
            sql,
            error: Some(error.into()),
        }
    }
}

/// Natural-language schema evolution: GENERATE-DDL → EXTRACT →
/// VALIDATE(schema tier) → EXECUTE-SEQUENTIAL → LOG. Each statement runs in
/// its own transaction so early DDL successes survive a later failure.
pub struct SchemaAssistant {
    llm: Arc<dyn LlmProvider>,
    connection: Arc<dyn SchemaConnection>,
    validator: SqlValidator,
    dialect_check: bool,
    dialect_name: String,
    history: FileHistoryStore,
}

impl SchemaAssistant {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        connection: Arc<dyn SchemaConnection>,
        validator: SqlValidator,
        dialect_check: bool,
        dialect_name: String,
        history: FileHistoryStore,
    ) -> Self {
        Self {
            llm,
            connection,
            validator,
            dialect_check,
            dialect_name,
            history,
        }
    }

    pub async fn process(&self, command: &str) -> MutationOutcome {
        match self.run(command).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "schema mutation pipeline failed");
                let message = format!("Error: {e}");
                if let Err(log_err) = self.history.add_entry(Role::Assistant, &message, None) {
                    warn!(error = %log_err, "failed to record history entry");
                }
                MutationOutcome::failure(e.to_string(), None)
            }
        }
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.history.entries()
    }

    pub fn clear_history(&self) -> Result<()> {
        self.history.clear()
    }

    /// Remove the persisted history file when the schema itself goes away.
    pub fn cleanup(&self) -> Result<bool> {
        self.history.delete_file()
    }

    async fn run(&self, command: &str) -> Result<MutationOutcome> {
        self.history.add_entry(Role::User, command, None)?;

        // GENERATE-DDL
        let schema = self.connection.snapshot().await?;
        let system = DDL_SYSTEM_TEMPLATE
            .replace("{dialect}", &self.dialect_name)
            .replace("{schema}", &schema.render_for_prompt());
        let raw = self.llm.generate_text(command, &system).await?;

        if raw.trim() == INVALID_REQUEST_SENTINEL {
            return Ok(MutationOutcome::failure(
                "Cannot perform this operation with the current schema",
                None,
            ));
        }

        // EXTRACT
        let sql = extract_sql(&raw);
        if sql.is_empty() {
            let error = "No valid SQL statements found in the model output";
            self.history.add_entry(Role::Assistant, error, None)?;
            return Ok(MutationOutcome::failure(error, None));
        }
        debug!(sql = %sql, "extracted DDL");

        // VALIDATE — the first failing statement aborts the whole batch.
        let statements: Vec<String> = sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        for statement in &statements {
            let mut verdict = self.validator.validate(statement, OperationTier::Schema);
            if verdict.is_valid && self.dialect_check {
                verdict = self.validator.dialect_check(statement);
            }
            if !verdict.is_valid {
                let error = format!("SQL validation failed: {}", verdict.message);
                self.history.add_entry(Role::Assistant, &error, None)?;
                return Ok(MutationOutcome::failure(error, Some(sql)));
            }
        }

        // EXECUTE-SEQUENTIAL — stop at the first failure, keep earlier
        // successes.
        let mut executed = 0usize;
        for statement in &statements {
            match self.connection.execute(statement).await {
                Ok(_) => executed += 1,
                Err(e) => {
                    let error = format!("Error executing statement: {e}");
                    self.history.add_entry(Role::Assistant, &error, None)?;
                    return Ok(MutationOutcome::failure(error, Some(sql)));
                }
            }
        }

        // LOG
        info!(statements = executed, "schema mutation applied");
        let message = "Successfully executed SQL".to_string();
        self.history
            .add_entry(Role::Assistant, &message, Some(&sql))?;
        Ok(MutationOutcome {
            success: true,
            message: Some(message),
            sql: Some(sql),
            error: None,
        })
    }
}

/// Strip markdown fencing and SQL comments, then require at least one DDL
/// keyword. A lightweight sanity filter, not a parser.
fn extract_sql(response: &str) -> String {
    let mut sql = response.trim().to_string();

    if sql.starts_with("```") && sql.ends_with("```") {
        sql = sql[3..sql.len() - 3].trim().to_string();
        if let Some(stripped) = sql.strip_prefix("sql") {
            sql = stripped.trim().to_string();
        }
    }

    sql = LINE_COMMENT_RE.replace_all(&sql, "").to_string();
    sql = BLOCK_COMMENT_RE.replace_all(&sql, "").to_string();
    let sql = sql.trim().to_string();

    if !DDL_KEYWORD_RE.is_match(&sql) {
        return String::new();
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_ddl() {
        let raw = "```sql\nCREATE TABLE t (id INT);\n```";
        assert_eq!(extract_sql(raw), "CREATE TABLE t (id INT);");
    }

    #[test]
    fn strips_line_and_block_comments() {
        let raw = "-- leading note\nCREATE TABLE t (id INT); /* trailing note */";
        let extracted = extract_sql(raw);
        assert!(extracted.starts_with("CREATE TABLE"));
        assert!(!extracted.contains("note"));
    }

    #[test]
    fn rejects_text_without_ddl_keywords() {
        assert_eq!(extract_sql("I cannot help with that."), "");
        assert_eq!(extract_sql(""), "");
    }
}
