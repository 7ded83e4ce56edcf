//! Read access to the pre-built document index

use super::documents::{
    ColumnDescription, DocumentRecord, Provenance, TableDescription, UNKNOWN_SOURCE,
};
use super::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, QueryResult, Statement};

/// Queryable collaborator exposing similarity and pattern-match search
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents whose similarity to `embedding` is at least `threshold`, best first
    async fn match_documents(
        &self,
        embedding: &[f32],
        threshold: f64,
        count: usize,
    ) -> Result<Vec<DocumentRecord>>;

    /// Documents whose content contains every pattern (case-insensitive)
    async fn match_content(&self, patterns: &[String], limit: usize) -> Result<Vec<DocumentRecord>>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    /// Tables and columns visible to the service
    async fn describe_tables(&self) -> Result<Vec<TableDescription>>;
}

/// Postgres + pgvector implementation
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: DbPool,
    documents_table: String,
    match_function: String,
}

impl PgDocumentStore {
    /// Table and function names must already be validated identifiers
    pub fn new(pool: DbPool, documents_table: &str, match_function: &str) -> Self {
        Self {
            pool,
            documents_table: documents_table.to_string(),
            match_function: match_function.to_string(),
        }
    }
}

/// Escape `%`, `_` and `\` so user text matches literally inside ILIKE
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn format_embedding(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

fn content_match_sql(table: &str, pattern_count: usize) -> String {
    let predicates = (1..=pattern_count)
        .map(|n| format!(r"content ILIKE ${} ESCAPE '\'", n))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "SELECT id::text AS id, title, content, doc_id::text AS doc_id \
         FROM {} WHERE {} LIMIT ${}",
        table,
        predicates,
        pattern_count + 1
    )
}

fn row_to_record(row: &QueryResult, provenance: Provenance) -> Result<DocumentRecord> {
    let similarity = match provenance {
        Provenance::Vector => row.try_get::<Option<f64>>("", "similarity")?,
        Provenance::Keyword => Some(0.0),
    };

    Ok(DocumentRecord {
        id: row.try_get::<Option<String>>("", "id")?,
        title: row
            .try_get::<Option<String>>("", "title")?
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
        content: row.try_get::<Option<String>>("", "content")?.unwrap_or_default(),
        doc_id: row.try_get::<Option<String>>("", "doc_id")?,
        similarity,
        provenance,
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn match_documents(
        &self,
        embedding: &[f32],
        threshold: f64,
        count: usize,
    ) -> Result<Vec<DocumentRecord>> {
        let sql = format!(
            "SELECT id::text AS id, title, content, doc_id::text AS doc_id, \
             similarity::float8 AS similarity \
             FROM {}($1::vector, $2, $3)",
            self.match_function
        );

        let values: Vec<sea_orm::Value> = vec![
            format_embedding(embedding).into(),
            threshold.into(),
            (count as i32).into(),
        ];

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);

        self.pool
            .read()
            .query_all(stmt)
            .await?
            .iter()
            .map(|row| row_to_record(row, Provenance::Vector))
            .collect()
    }

    async fn match_content(&self, patterns: &[String], limit: usize) -> Result<Vec<DocumentRecord>> {
        if patterns.is_empty() {
            return Err(AppError::Validation {
                message: "content match requires at least one pattern".to_string(),
                field: None,
            });
        }

        let sql = content_match_sql(&self.documents_table, patterns.len());

        let mut values: Vec<sea_orm::Value> = patterns
            .iter()
            .map(|p| format!("%{}%", escape_like(p)).into())
            .collect();
        values.push((limit as i64).into());

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);

        self.pool
            .read()
            .query_all(stmt)
            .await?
            .iter()
            .map(|row| row_to_record(row, Provenance::Keyword))
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    async fn describe_tables(&self) -> Result<Vec<TableDescription>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT table_name::text AS table_name, column_name::text AS column_name, \
             data_type::text AS data_type \
             FROM information_schema.columns \
             WHERE table_schema = 'public' \
             ORDER BY table_name, ordinal_position",
        );

        let rows = self.pool.read().query_all(stmt).await?;

        let mut tables: Vec<TableDescription> = Vec::new();
        for row in &rows {
            let table: String = row.try_get("", "table_name")?;
            let column = ColumnDescription {
                name: row.try_get("", "column_name")?,
                data_type: row.try_get("", "data_type")?,
            };

            match tables.last_mut() {
                Some(last) if last.name == table => last.columns.push(column),
                _ => tables.push(TableDescription {
                    name: table,
                    columns: vec![column],
                }),
            }
        }

        Ok(tables)
    }
}
