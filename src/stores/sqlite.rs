//! Embedded vector index on SQLite with the `sqlite-vec` extension.
//!
//! Each index name maps to a table pair sharing rowids: a plain chunk table
//! for text and provenance metadata, and a `vec0` virtual table holding the
//! embeddings. Similarity search joins the two and orders by cosine
//! distance; similarity is reported as `1 − distance`.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::OnceLock;

use tokio_rusqlite::{ffi, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use tracing::debug;
use uuid::Uuid;

use crate::types::{ChunkMetadata, DocLevel, EmbeddedChunk, RagError, SearchHit, StoredChunk};

use super::{FieldFilter, VectorIndex};

/// Metadata columns a [`FieldFilter`] may reference.
const FILTERABLE_COLUMNS: [&str; 4] = ["doc_level", "source", "parent_doc_id", "page"];

pub struct SqliteVectorIndex {
    conn: Connection,
    index: String,
    chunk_table: String,
    vec_table: String,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Open (or create) the database file and bind to `index_name`.
    ///
    /// The collection's tables are not created until
    /// [`ensure_index`](VectorIndex::ensure_index).
    pub async fn open(
        path: impl AsRef<Path>,
        index_name: &str,
        dimensions: usize,
    ) -> Result<Self, RagError> {
        register_sqlite_vec()?;
        let conn = Connection::open(path.as_ref().to_path_buf())
            .await
            .map_err(|err| RagError::Connection(err.to_string()))?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Error)
        })
        .await
        .map_err(|err| RagError::Storage(format!("sqlite-vec unavailable: {err}")))?;

        let ident = table_ident(index_name);
        Ok(Self {
            conn,
            index: index_name.to_string(),
            chunk_table: format!("{ident}_chunks"),
            vec_table: format!("{ident}_vec"),
            dimensions,
        })
    }

    fn storage_error(&self, err: impl std::fmt::Display) -> RagError {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("dimension") {
            RagError::Schema {
                index: self.index.clone(),
                detail: message,
            }
        } else if lowered.contains("no such table") {
            RagError::NotFound(format!("index '{}'", self.index))
        } else {
            RagError::Storage(message)
        }
    }
}

#[async_trait::async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn index_name(&self) -> &str {
        &self.index
    }

    async fn ensure_index(&self) -> Result<(), RagError> {
        let chunk_table = self.chunk_table.clone();
        let vec_table = self.vec_table.clone();
        let dimensions = self.dimensions;
        self.conn
            .call(move |conn| -> Result<(), tokio_rusqlite::Error> {
                conn.execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS {chunk_table} (
                            id TEXT NOT NULL UNIQUE,
                            text TEXT NOT NULL,
                            source TEXT NOT NULL,
                            page INTEGER NOT NULL,
                            doc_level TEXT NOT NULL,
                            parent_doc_id TEXT
                        )"
                    ),
                    [],
                )
                .map_err(tokio_rusqlite::Error::Error)?;
                conn.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS {vec_table} \
                         USING vec0(embedding float[{dimensions}])"
                    ),
                    [],
                )
                .map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| self.storage_error(err))
    }

    async fn index_exists(&self) -> Result<bool, RagError> {
        let chunk_table = self.chunk_table.clone();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&chunk_table],
                    |_| Ok(()),
                )
                .optional()
                .map(|found| found.is_some())
                .map_err(tokio_rusqlite::Error::Error)
            })
            .await
            .map_err(|err| self.storage_error(err))
    }

    async fn delete_index(&self) -> Result<bool, RagError> {
        let existed = self.index_exists().await?;
        let chunk_table = self.chunk_table.clone();
        let vec_table = self.vec_table.clone();
        self.conn
            .call(move |conn| -> Result<(), tokio_rusqlite::Error> {
                conn.execute(&format!("DROP TABLE IF EXISTS {vec_table}"), [])
                    .map_err(tokio_rusqlite::Error::Error)?;
                conn.execute(&format!("DROP TABLE IF EXISTS {chunk_table}"), [])
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| self.storage_error(err))?;
        debug!(index = %self.index, existed, "index dropped");
        Ok(existed)
    }

    async fn add_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<Vec<String>, RagError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        // Store-assigned identifiers, one per input chunk, in input order.
        let rows: Result<Vec<_>, RagError> = chunks
            .iter()
            .map(|chunk| {
                let embedding = serde_json::to_string(&chunk.embedding)
                    .map_err(|err| RagError::InvalidArgument(err.to_string()))?;
                Ok((
                    Uuid::new_v4().to_string(),
                    chunk.chunk.text.clone(),
                    chunk.chunk.metadata.source.clone(),
                    i64::from(chunk.chunk.metadata.page),
                    chunk.chunk.metadata.doc_level.to_string(),
                    chunk.chunk.metadata.parent_doc_id.clone(),
                    embedding,
                ))
            })
            .collect();
        let rows = rows?;
        let ids: Vec<String> = rows.iter().map(|row| row.0.clone()).collect();

        let chunk_table = self.chunk_table.clone();
        let vec_table = self.vec_table.clone();
        self.conn
            .call(move |conn| -> Result<(), tokio_rusqlite::Error> {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Error)?;
                for (id, text, source, page, doc_level, parent_doc_id, embedding) in &rows {
                    tx.execute(
                        &format!(
                            "INSERT INTO {chunk_table} \
                             (id, text, source, page, doc_level, parent_doc_id) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                        ),
                        &[
                            id as &dyn ToSql,
                            text,
                            source,
                            page,
                            doc_level,
                            parent_doc_id,
                        ][..],
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                    let rowid = tx.last_insert_rowid();
                    tx.execute(
                        &format!(
                            "INSERT INTO {vec_table} (rowid, embedding) VALUES (?1, vec_f32(?2))"
                        ),
                        &[&rowid as &dyn ToSql, embedding][..],
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| self.storage_error(err))?;

        debug!(index = %self.index, count = ids.len(), "chunks written");
        Ok(ids)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&FieldFilter>,
    ) -> Result<Vec<SearchHit>, RagError> {
        if let Some(filter) = filter {
            if !FILTERABLE_COLUMNS.contains(&filter.field.as_str()) {
                return Err(RagError::InvalidArgument(format!(
                    "unsupported filter field '{}'",
                    filter.field
                )));
            }
        }

        let embedding_json = serde_json::to_string(query)
            .map_err(|err| RagError::InvalidArgument(err.to_string()))?;
        let chunk_table = self.chunk_table.clone();
        let vec_table = self.vec_table.clone();
        let filter_clause = filter
            .map(|f| format!("WHERE c.{} = ?2", f.field))
            .unwrap_or_default();
        let filter_value = filter.map(|f| f.value.clone());

        let rows = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT c.id, c.text, c.source, c.page, c.doc_level, c.parent_doc_id, \
                            vec_to_json(v.embedding), \
                            vec_distance_cosine(v.embedding, vec_f32(?1)) AS distance \
                     FROM {chunk_table} c \
                     JOIN {vec_table} v ON v.rowid = c.rowid \
                     {filter_clause} \
                     ORDER BY distance ASC \
                     LIMIT {k}"
                );
                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Error)?;
                let map_row = |row: &Row<'_>| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, f64>(7)?,
                    ))
                };
                let rows = match &filter_value {
                    Some(value) => stmt
                        .query_map(&[&embedding_json as &dyn ToSql, value][..], map_row)
                        .map_err(tokio_rusqlite::Error::Error)?
                        .collect::<Result<Vec<_>, _>>(),
                    None => stmt
                        .query_map(&[&embedding_json as &dyn ToSql][..], map_row)
                        .map_err(tokio_rusqlite::Error::Error)?
                        .collect::<Result<Vec<_>, _>>(),
                };
                rows.map_err(tokio_rusqlite::Error::Error)
            })
            .await
            .map_err(|err| self.storage_error(err))?;

        rows.into_iter()
            .map(
                |(id, text, source, page, doc_level, parent_doc_id, embedding, distance)| {
                    let embedding: Vec<f32> = serde_json::from_str(&embedding)
                        .map_err(|err| RagError::Storage(format!("stored vector: {err}")))?;
                    Ok(SearchHit {
                        id,
                        text,
                        metadata: metadata_from_columns(source, page, &doc_level, parent_doc_id)?,
                        embedding,
                        score: 1.0 - distance as f32,
                    })
                },
            )
            .collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<StoredChunk, RagError> {
        let wanted = vec![id.to_string()];
        let chunks = self.get_by_ids(&wanted).await?;
        chunks
            .into_iter()
            .next()
            .ok_or_else(|| RagError::NotFound(format!("chunk '{id}' in index '{}'", self.index)))
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>, RagError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_table = self.chunk_table.clone();
        let wanted: Vec<String> = ids.to_vec();
        let rows = self
            .conn
            .call(move |conn| {
                let placeholders = (1..=wanted.len())
                    .map(|i| format!("?{i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT id, text, source, page, doc_level, parent_doc_id \
                     FROM {chunk_table} WHERE id IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Error)?;
                let mapped = stmt
                    .query_map(params_from_iter(wanted.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Error)?
                    .collect::<Result<Vec<_>, _>>();
                mapped.map_err(tokio_rusqlite::Error::Error)
            })
            .await
            .map_err(|err| self.storage_error(err))?;

        let mut by_id = std::collections::HashMap::new();
        for (id, text, source, page, doc_level, parent_doc_id) in rows {
            let chunk = StoredChunk {
                id: id.clone(),
                text,
                metadata: metadata_from_columns(source, page, &doc_level, parent_doc_id)?,
            };
            by_id.insert(id, chunk);
        }

        // Preserve the caller's order; every requested id must exist.
        ids.iter()
            .map(|id| {
                by_id.remove(id).ok_or_else(|| {
                    RagError::NotFound(format!("chunk '{id}' in index '{}'", self.index))
                })
            })
            .collect()
    }
}

fn metadata_from_columns(
    source: String,
    page: i64,
    doc_level: &str,
    parent_doc_id: Option<String>,
) -> Result<ChunkMetadata, RagError> {
    let doc_level = match doc_level {
        "parent" => DocLevel::Parent,
        "child" => DocLevel::Child,
        other => {
            return Err(RagError::Storage(format!(
                "unknown doc_level '{other}' in stored chunk"
            )))
        }
    };
    Ok(ChunkMetadata {
        source,
        page: page as u32,
        doc_level,
        parent_doc_id,
    })
}

/// SQL identifier derived from an index name (alphanumerics preserved,
/// everything else folded to `_`).
fn table_ident(index_name: &str) -> String {
    index_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn register_sqlite_vec() -> Result<(), RagError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| unsafe {
        type SqliteExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *mut c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: SqliteExtensionInit =
            transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init_fn));
        if rc != 0 {
            Err(format!("failed to register sqlite-vec extension (code {rc})"))
        } else {
            Ok(())
        }
    })
    .clone()
    .map_err(RagError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ident_folds_non_alphanumerics() {
        assert_eq!(table_ident("docs-titanembedv2"), "docs_titanembedv2");
        assert_eq!(table_ident("a.b:c"), "a_b_c");
    }
}
