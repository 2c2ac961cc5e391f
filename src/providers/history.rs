use std::fs;
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use crate::domains::history::{HistoryEntry, Role};
use crate::error::{Result, TableTalkError};

/// Append-only schema modification log, one JSON array file per schema name.
pub struct FileHistoryStore {
    path: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: impl AsRef<Path>, schema_name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
        Ok(Self {
            path: dir.join(format!("{schema_name}_history.json")),
        })
    }

    pub fn add_entry(&self, role: Role, content: &str, sql: Option<&str>) -> Result<()> {
        let mut entries = self.entries()?;
        // An assistant response with SQL logs the statement itself rather
        // than prose.
        let entry = match (role, sql) {
            (Role::Assistant, Some(sql)) if !sql.trim().is_empty() => HistoryEntry {
                role,
                content: "Successfully executed SQL".to_string(),
                sql: Some(sql.trim().to_string()),
                timestamp: now_rfc3339()?,
            },
            _ => HistoryEntry {
                role,
                content: content.to_string(),
                sql: None,
                timestamp: now_rfc3339()?,
            },
        };
        entries.push(entry);
        self.save(&entries)
    }

    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "history file unreadable, starting fresh");
                Ok(Vec::new())
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.save(&Vec::new())
    }

    /// Remove the log file entirely (schema teardown).
    pub fn delete_file(&self) -> Result<bool> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn save(&self, entries: &Vec<HistoryEntry>) -> Result<()> {
        let rendered = serde_json::to_vec_pretty(entries)
            .map_err(|e| TableTalkError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, rendered).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
        Ok(())
    }
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| TableTalkError::Runtime(e.to_string()))
}
