use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use serde_json::{Map, Value};
use tracing::info;

use crate::domains::schema::{
    ColumnInfo, ForeignKeyInfo, ForeignKeyRef, SchemaDescription, TableInfo,
};
use crate::error::{Result, TableTalkError};
use crate::interfaces::providers::SchemaConnection;

type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

/// `SchemaConnection` over a SQLite database file. SQLite stores no table or
/// column comments, so snapshots report them as absent.
pub struct SqliteSchemaConnection {
    pool: SqlitePool,
}

impl SqliteSchemaConnection {
    pub async fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        ensure_parent_dir(&path)?;
        let pool = tokio::task::spawn_blocking(move || {
            let manager = SqliteConnectionManager::file(&path);
            r2d2::Pool::builder()
                .build(manager)
                .map_err(|e| TableTalkError::Database(e.to_string()))
        })
        .await
        .map_err(|e| TableTalkError::Runtime(e.to_string()))??;
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| TableTalkError::Database(e.to_string()))?;
            job(&mut conn)
        })
        .await
        .map_err(|e| TableTalkError::Runtime(e.to_string()))?
    }
}

#[async_trait]
impl SchemaConnection for SqliteSchemaConnection {
    async fn snapshot(&self) -> Result<SchemaDescription> {
        self.with_conn(|conn| snapshot_blocking(conn)).await
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Value>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| fetch_rows_blocking(conn, &sql))
            .await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let sql = sql.to_string();
        info!(statement = %sql, "executing SQL statement");
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| TableTalkError::Database(e.to_string()))?;
            let affected = tx
                .execute(&sql, [])
                .map_err(|e| TableTalkError::Database(e.to_string()))?;
            tx.commit()
                .map_err(|e| TableTalkError::Database(e.to_string()))?;
            Ok(affected as u64)
        })
        .await
    }
}

fn snapshot_blocking(conn: &rusqlite::Connection) -> Result<SchemaDescription> {
    let mut names_stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .map_err(|e| TableTalkError::Database(e.to_string()))?;
    let table_names: Vec<String> = names_stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| TableTalkError::Database(e.to_string()))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| TableTalkError::Database(e.to_string()))?;

    let mut tables = Vec::with_capacity(table_names.len());
    for table_name in table_names {
        tables.push(table_snapshot(conn, &table_name)?);
    }
    Ok(SchemaDescription { tables })
}

fn table_snapshot(conn: &rusqlite::Connection, table_name: &str) -> Result<TableInfo> {
    struct PragmaColumn {
        name: String,
        sql_type: String,
        notnull: bool,
        pk: bool,
    }

    let mut columns_stmt = conn
        .prepare(&format!("PRAGMA table_info('{}')", escape_identifier(table_name)))
        .map_err(|e| TableTalkError::Database(e.to_string()))?;
    let pragma_columns: Vec<PragmaColumn> = columns_stmt
        .query_map([], |row| {
            Ok(PragmaColumn {
                name: row.get::<_, String>("name")?,
                sql_type: row.get::<_, String>("type")?,
                notnull: row.get::<_, i64>("notnull")? != 0,
                pk: row.get::<_, i64>("pk")? != 0,
            })
        })
        .map_err(|e| TableTalkError::Database(e.to_string()))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| TableTalkError::Database(e.to_string()))?;

    let mut fk_stmt = conn
        .prepare(&format!(
            "PRAGMA foreign_key_list('{}')",
            escape_identifier(table_name)
        ))
        .map_err(|e| TableTalkError::Database(e.to_string()))?;
    let foreign_keys: Vec<(String, String, Option<String>)> = fk_stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>("from")?,
                row.get::<_, String>("table")?,
                row.get::<_, Option<String>>("to")?,
            ))
        })
        .map_err(|e| TableTalkError::Database(e.to_string()))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| TableTalkError::Database(e.to_string()))?;

    let columns = pragma_columns
        .into_iter()
        .map(|col| {
            let references: Vec<ForeignKeyRef> = foreign_keys
                .iter()
                .filter(|(from, _, _)| from == &col.name)
                .map(|(_, ref_table, ref_column)| ForeignKeyRef {
                    table: ref_table.clone(),
                    column: ref_column.clone().unwrap_or_else(|| "rowid".to_string()),
                    column_comment: None,
                })
                .collect();
            ColumnInfo {
                name: col.name,
                sql_type: col.sql_type,
                nullable: !col.notnull && !col.pk,
                primary_key: col.pk,
                comment: None,
                foreign_key: ForeignKeyInfo::referencing(references),
            }
        })
        .collect();

    Ok(TableInfo {
        name: table_name.to_string(),
        comment: None,
        columns,
    })
}

fn fetch_rows_blocking(conn: &rusqlite::Connection, sql: &str) -> Result<Vec<Value>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| TableTalkError::Database(e.to_string()))?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| TableTalkError::Database(e.to_string()))?;
    let mut output = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| TableTalkError::Database(e.to_string()))?
    {
        let mut object = Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = match row
                .get_ref(i)
                .map_err(|e| TableTalkError::Database(e.to_string()))?
            {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::from(v),
                ValueRef::Real(v) => Value::from(v),
                ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).to_string()),
                ValueRef::Blob(bytes) => Value::String(general_purpose::STANDARD.encode(bytes)),
            };
            object.insert(name.clone(), value);
        }
        output.push(Value::Object(object));
    }
    Ok(output)
}

fn escape_identifier(name: &str) -> String {
    name.replace('\'', "''")
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| TableTalkError::Runtime(e.to_string()))?;
        }
    }
    Ok(())
}
