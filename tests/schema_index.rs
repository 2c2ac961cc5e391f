mod common;

use std::sync::Arc;
use std::sync::Mutex;

use common::MockLlm;
use tempfile::TempDir;

use tabletalk::domains::schema::{
    ColumnInfo, ForeignKeyInfo, ForeignKeyRef, SchemaDescription, TableInfo,
};
use tabletalk::index::SchemaIndex;

fn sample_schema() -> SchemaDescription {
    SchemaDescription {
        tables: vec![
            TableInfo {
                name: "departments".to_string(),
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
                        name: "name".to_string(),
                        sql_type: "TEXT".to_string(),
                        nullable: false,
                        primary_key: false,
                        comment: None,
                        foreign_key: ForeignKeyInfo::none(),
                    },
                ],
            },
            TableInfo {
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
                            column_comment: None,
                        }]),
                    },
                ],
            },
        ],
    }
}

fn open_index(dir: &TempDir) -> SchemaIndex {
    SchemaIndex::open(
        dir.path().join("idx"),
        Arc::new(MockLlm::new(Vec::<String>::new())),
        None,
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn fresh_namespace_is_stale_until_built() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();

    assert!(!index.exists());
    assert!(index.is_stale(&schema).await.unwrap());

    index.build(&schema, None).await.unwrap();
    assert!(index.exists());
    assert!(!index.is_stale(&schema).await.unwrap());
}

#[tokio::test]
async fn any_single_column_change_forces_staleness() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();
    index.build(&schema, None).await.unwrap();

    let mut changed = sample_schema();
    changed.tables[1].columns[1].nullable = false;
    assert!(index.is_stale(&changed).await.unwrap());

    let mut changed = sample_schema();
    changed.tables[0].columns[1].sql_type = "VARCHAR(64)".to_string();
    assert!(index.is_stale(&changed).await.unwrap());

    let mut changed = sample_schema();
    changed.tables[0].columns[1].comment = Some("display name".to_string());
    assert!(index.is_stale(&changed).await.unwrap());
}

#[tokio::test]
async fn search_scores_are_bounded_and_threshold_filters() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();
    index.build(&schema, None).await.unwrap();

    let hits = index.search("employees and departments", 10, -1.0).await.unwrap();
    assert_eq!(hits.len(), 2, "k beyond the record count returns everything");
    for hit in &hits {
        assert!((-1.0..=1.0).contains(&hit.score), "score {}", hit.score);
    }
    let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
    assert!(scores[0] >= scores[1], "results are sorted by descending score");

    let hits = index.search("employees", 10, 1.1).await.unwrap();
    assert!(hits.is_empty(), "threshold above 1 discards everything");
}

#[tokio::test]
async fn identical_text_query_scores_one() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();
    index.build(&schema, None).await.unwrap();

    let query = schema.tables[1].embedding_text();
    let hits = index.search(&query, 1, -1.0).await.unwrap();
    assert_eq!(hits[0].metadata.table, "employees");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn table_search_groups_by_table_sorted_by_score() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();
    index.build(&schema, None).await.unwrap();

    let query = schema.tables[1].embedding_text();
    let tables = index.table_search(&query, -1.0).await.unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].table, "employees");
    assert!(tables[0].score >= tables[1].score);
    assert!(tables[0].description.contains("employees"));
}

#[tokio::test]
async fn rebuild_of_unchanged_schema_is_byte_identical_for_texts_and_metadata() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();

    index.build(&schema, None).await.unwrap();
    let texts_a = std::fs::read(dir.path().join("idx/texts.json")).unwrap();
    let tables_a = std::fs::read(dir.path().join("idx/tables.json")).unwrap();

    index.build(&schema, None).await.unwrap();
    let texts_b = std::fs::read(dir.path().join("idx/texts.json")).unwrap();
    let tables_b = std::fs::read(dir.path().join("idx/tables.json")).unwrap();

    assert_eq!(texts_a, texts_b);
    assert_eq!(tables_a, tables_b);
}

#[tokio::test]
async fn persisted_index_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let schema = sample_schema();
    {
        let index = open_index(&dir);
        index.build(&schema, None).await.unwrap();
    }

    let reopened = open_index(&dir);
    assert!(!reopened.is_stale(&schema).await.unwrap());
    let hits = reopened.search("employees", 10, -1.0).await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn corrupted_vector_file_is_treated_as_absent() {
    let dir = TempDir::new().unwrap();
    let schema = sample_schema();
    {
        let index = open_index(&dir);
        index.build(&schema, None).await.unwrap();
    }
    std::fs::write(dir.path().join("idx/vectors.bin"), b"not a vector file").unwrap();

    let reopened = open_index(&dir);
    assert!(reopened.is_stale(&schema).await.unwrap());
    let hits = reopened.search("employees", 10, -1.0).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn progress_reports_monotonically_and_ends_at_one() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();

    let seen: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress: tabletalk::index::ProgressCallback =
        Box::new(move |fraction| sink.lock().unwrap().push(fraction));

    index.build(&schema, Some(&progress)).await.unwrap();

    let values = seen.lock().unwrap().clone();
    assert!(!values.is_empty());
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "progress went backwards: {values:?}");
    }
    assert!((values.last().unwrap() - 1.0).abs() < f32::EPSILON);
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[tokio::test]
async fn embedding_falls_back_to_alternate_model() {
    let dir = TempDir::new().unwrap();
    let schema = sample_schema();

    let embedder = Arc::new(
        MockLlm::new(Vec::<String>::new()).failing_embed_model("primary-model"),
    );
    let index = SchemaIndex::open(
        dir.path().join("idx"),
        embedder,
        Some("primary-model".to_string()),
        Some("backup-model".to_string()),
    )
    .unwrap();
    index.build(&schema, None).await.unwrap();
    assert!(!index.is_stale(&schema).await.unwrap());
}

#[tokio::test]
async fn embedding_failure_without_fallback_is_fatal() {
    let dir = TempDir::new().unwrap();
    let schema = sample_schema();

    let embedder = Arc::new(
        MockLlm::new(Vec::<String>::new()).failing_embed_model("primary-model"),
    );
    let index = SchemaIndex::open(
        dir.path().join("idx"),
        embedder,
        Some("primary-model".to_string()),
        None,
    )
    .unwrap();
    let result = index.build(&schema, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn delete_removes_the_trio() {
    let dir = TempDir::new().unwrap();
    let index = open_index(&dir);
    let schema = sample_schema();
    index.build(&schema, None).await.unwrap();
    assert!(index.exists());

    index.delete().await.unwrap();
    assert!(!index.exists());
    assert!(index.is_stale(&schema).await.unwrap());
}
