use async_trait::async_trait;
use serde_json::Value;

use crate::domains::schema::SchemaDescription;
use crate::error::Result;

/// Language-model collaborator: a single synchronous completion call plus
/// batch text embedding. Streaming, retries, and timeouts are the provider's
/// own policy.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_text(&self, prompt: &str, system_prompt: &str) -> Result<String>;

    async fn embed(&self, inputs: Vec<String>, model: Option<&str>) -> Result<Vec<Vec<f32>>>;
}

/// Opaque database handle with the two capabilities the pipeline needs:
/// schema introspection and SQL execution under transaction control. How the
/// connection is established (pooling, URLs, retries) is the implementor's
/// concern.
#[async_trait]
pub trait SchemaConnection: Send + Sync {
    /// Introspect the live schema. Produces a fresh normalized description on
    /// every call; callers never mutate it in place.
    async fn snapshot(&self) -> Result<SchemaDescription>;

    /// Run a statement and materialize every row as a JSON object keyed by
    /// column name.
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Value>>;

    /// Run a single statement in its own transaction. Returns the number of
    /// affected rows where the backend reports one.
    async fn execute(&self, sql: &str) -> Result<u64>;
}
