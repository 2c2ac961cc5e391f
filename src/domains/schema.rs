use serde::{Deserialize, Serialize};

use crate::error::{Result, TableTalkError};

/// One foreign-key reference target. `column_comment` carries the comment of
/// the referenced column when the backend exposes one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
    pub column_comment: Option<String>,
}

/// Foreign-key facts for a column. Always present: a column that is not a
/// foreign key carries `is_fk: false` with an empty reference list, never an
/// absent field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub is_fk: bool,
    pub references: Vec<ForeignKeyRef>,
}

impl ForeignKeyInfo {
    pub fn none() -> Self {
        Self {
            is_fk: false,
            references: Vec::new(),
        }
    }

    pub fn referencing(references: Vec<ForeignKeyRef>) -> Self {
        Self {
            is_fk: !references.is_empty(),
            references,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub comment: Option<String>,
    pub foreign_key: ForeignKeyInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<ColumnInfo>,
}

/// Normalized snapshot of a database schema. Rebuilt wholesale on every
/// introspection; never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableInfo>,
}

impl SchemaDescription {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Canonical serialization used for staleness comparison. serde_json maps
    /// are ordered, so the output is key-sorted and whitespace-free by
    /// construction.
    pub fn fingerprint(&self) -> Result<String> {
        let value =
            serde_json::to_value(self).map_err(|e| TableTalkError::Serialization(e.to_string()))?;
        serde_json::to_string(&value).map_err(|e| TableTalkError::Serialization(e.to_string()))
    }
}

impl TableInfo {
    /// Natural-language description of one table, the text that gets
    /// embedded.
    pub fn embedding_text(&self) -> String {
        let mut description = format!("Table {} contains columns: ", self.name);
        let column_descriptions: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut desc = format!("{} ({})", col.name, col.sql_type);
                if col.primary_key {
                    desc.push_str(" (primary key)");
                }
                if col.foreign_key.is_fk {
                    let refs = col
                        .foreign_key
                        .references
                        .iter()
                        .map(|r| match &r.column_comment {
                            Some(comment) => format!("{}.{} [{}]", r.table, r.column, comment),
                            None => format!("{}.{}", r.table, r.column),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    desc.push_str(&format!(" (foreign key referencing {})", refs));
                }
                if let Some(comment) = &col.comment {
                    desc.push_str(&format!(" -- {}", comment));
                }
                desc
            })
            .collect();
        description.push_str(&column_descriptions.join(", "));
        if let Some(comment) = &self.comment {
            description.push_str(&format!(". Table purpose: {}", comment));
        }
        description
    }

    /// Column summaries kept alongside the table metadata in the index.
    pub fn column_summaries(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|col| format!("{} ({})", col.name, col.sql_type))
            .collect()
    }
}

impl SchemaDescription {
    /// Plain-text rendering fed to the DDL generation prompt.
    pub fn render_for_prompt(&self) -> String {
        let mut blocks = Vec::new();
        for table in &self.tables {
            let mut lines = vec![format!("Table: {}", table.name)];
            if let Some(comment) = &table.comment {
                lines.push(format!("Comment: {}", comment));
            }
            if !table.columns.is_empty() {
                lines.push("Columns:".to_string());
                for col in &table.columns {
                    let mut line = format!("  - {} {}", col.name, col.sql_type);
                    if !col.nullable {
                        line.push_str(" NOT NULL");
                    }
                    if col.primary_key {
                        line.push_str(" PRIMARY KEY");
                    }
                    if let Some(comment) = &col.comment {
                        line.push_str(&format!(" COMMENT '{}'", comment));
                    }
                    for fk in &col.foreign_key.references {
                        line.push_str(&format!(" REFERENCES {}.{}", fk.table, fk.column));
                    }
                    lines.push(line);
                }
            }
            blocks.push(lines.join("\n"));
        }
        blocks.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> SchemaDescription {
        SchemaDescription {
            tables: vec![TableInfo {
                name: "employees".to_string(),
                comment: None,
                columns: vec![
                    ColumnInfo {
                        name: "id".to_string(),
                        sql_type: "INTEGER".to_string(),
                        nullable: false,
                        primary_key: true,
                        comment: None,
                        foreign_key: ForeignKeyInfo::none(),
                    },
                    ColumnInfo {
                        name: "dept_id".to_string(),
                        sql_type: "INTEGER".to_string(),
                        nullable: true,
                        primary_key: false,
                        comment: None,
                        foreign_key: ForeignKeyInfo::referencing(vec![ForeignKeyRef {
                            table: "departments".to_string(),
                            column: "id".to_string(),
                            column_comment: Some("department identifier".to_string()),
                        }]),
                    },
                ],
            }],
        }
    }

    #[test]
    fn fingerprint_is_stable_for_equal_schemas() {
        let a = sample_schema();
        let b = sample_schema();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_changes_on_nullability_flip() {
        let a = sample_schema();
        let mut b = sample_schema();
        b.tables[0].columns[1].nullable = false;
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_changes_on_comment_change() {
        let a = sample_schema();
        let mut b = sample_schema();
        b.tables[0].columns[0].comment = Some("surrogate key".to_string());
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_changes_on_type_change() {
        let a = sample_schema();
        let mut b = sample_schema();
        b.tables[0].columns[0].sql_type = "BIGINT".to_string();
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn embedding_text_names_keys_and_references() {
        let schema = sample_schema();
        let text = schema.tables[0].embedding_text();
        assert!(text.starts_with("Table employees contains columns:"));
        assert!(text.contains("id (INTEGER) (primary key)"));
        assert!(text.contains("foreign key referencing departments.id [department identifier]"));
    }

    #[test]
    fn prompt_rendering_marks_constraints() {
        let rendered = sample_schema().render_for_prompt();
        assert!(rendered.contains("Table: employees"));
        assert!(rendered.contains("- id INTEGER NOT NULL PRIMARY KEY"));
        assert!(rendered.contains("REFERENCES departments.id"));
    }
}
