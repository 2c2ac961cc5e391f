#![allow(dead_code)]

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tabletalk::error::{Result, TableTalkError};
use tabletalk::interfaces::providers::{LlmProvider, SchemaConnection};

/// Scripted chat responses plus a deterministic bag-of-words embedder, so
/// retrieval behaves repeatably without a live model.
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
    fail_embed_model: Option<String>,
}

impl MockLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            fail_embed_model: None,
        }
    }

    /// Make `embed` fail whenever it is called with this model name.
    pub fn failing_embed_model(mut self, model: &str) -> Self {
        self.fail_embed_model = Some(model.to_string());
        self
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn generate_text(&self, _prompt: &str, _system_prompt: &str) -> Result<String> {
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| TableTalkError::Http("no scripted response left".to_string()))
    }

    async fn embed(&self, inputs: Vec<String>, model: Option<&str>) -> Result<Vec<Vec<f32>>> {
        if let Some(fail_model) = &self.fail_embed_model {
            if model == Some(fail_model.as_str()) {
                return Err(TableTalkError::Http(
                    "embedding model unavailable".to_string(),
                ));
            }
        }
        Ok(inputs.iter().map(|text| embed_text(text)).collect())
    }
}

/// 16-dimensional token histogram; texts sharing words score higher under
/// cosine similarity, identical texts score 1.0.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 16];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vector[(hash % 16) as usize] += 1.0;
    }
    vector
}

/// Create the two-table fixture from the end-to-end property: employees
/// referencing departments, with a few rows.
pub async fn seed_employees_db(connection: &dyn SchemaConnection) -> Result<()> {
    connection
        .execute(
            "CREATE TABLE departments (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        )
        .await?;
    connection
        .execute(
            "CREATE TABLE employees (\
             id INTEGER PRIMARY KEY, \
             name TEXT, \
             dept_id INTEGER REFERENCES departments(id))",
        )
        .await?;
    connection
        .execute("INSERT INTO departments (id, name) VALUES (1, 'Engineering')")
        .await?;
    connection
        .execute("INSERT INTO departments (id, name) VALUES (2, 'Sales')")
        .await?;
    connection
        .execute("INSERT INTO employees (id, name, dept_id) VALUES (1, 'Ada', 1)")
        .await?;
    connection
        .execute("INSERT INTO employees (id, name, dept_id) VALUES (2, 'Grace', 1)")
        .await?;
    connection
        .execute("INSERT INTO employees (id, name, dept_id) VALUES (3, 'Linus', 2)")
        .await?;
    Ok(())
}
