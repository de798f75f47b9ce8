//! SQLite-backed `DocumentStore` implementation with durable persistence.

use crate::{
    into_document, matches_filter, merge_fields, CollectionRef, Document, DocumentStore,
    StoreError, StoreResult,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Persistent SQLite store backend; documents are kept as JSON text rows.
#[derive(Debug)]
pub struct SqliteDocumentStore {
    db_path: PathBuf,
}

impl SqliteDocumentStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_id INTEGER PRIMARY KEY AUTOINCREMENT,
                database_name TEXT NOT NULL,
                collection_name TEXT NOT NULL,
                body_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection
                ON documents (database_name, collection_name, doc_id);
            "#,
        )?;
        debug!(path = %store.db_path.display(), "opened sqlite document store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

fn load_rows(
    connection: &Connection,
    collection: &CollectionRef,
) -> StoreResult<Vec<(i64, Document)>> {
    let mut statement = connection.prepare(
        r#"
        SELECT doc_id, body_json FROM documents
        WHERE database_name = ?1 AND collection_name = ?2
        ORDER BY doc_id ASC
        "#,
    )?;
    let mut rows = statement.query(params![collection.database, collection.collection])?;
    let mut documents = Vec::new();
    while let Some(row) = rows.next()? {
        let doc_id: i64 = row.get(0)?;
        let body: String = row.get(1)?;
        let value = serde_json::from_str::<Value>(&body)?;
        documents.push((doc_id, into_document(value, collection)?));
    }
    Ok(documents)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_one(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        let connection = self.open_connection()?;
        Ok(load_rows(&connection, collection)?
            .into_iter()
            .map(|(_, document)| document)
            .find(|document| matches_filter(document, filter)))
    }

    async fn find(
        &self,
        collection: &CollectionRef,
        filter: &Document,
    ) -> StoreResult<Vec<Document>> {
        let connection = self.open_connection()?;
        Ok(load_rows(&connection, collection)?
            .into_iter()
            .map(|(_, document)| document)
            .filter(|document| matches_filter(document, filter))
            .collect())
    }

    async fn insert(&self, collection: &CollectionRef, document: Document) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO documents (database_name, collection_name, body_json)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                collection.database,
                collection.collection,
                serde_json::to_string(&document)?
            ],
        )?;
        Ok(())
    }

    async fn update(
        &self,
        collection: &CollectionRef,
        filter: &Document,
        fields: Document,
    ) -> StoreResult<bool> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let matched = load_rows(&transaction, collection)?
            .into_iter()
            .find(|(_, document)| matches_filter(document, filter));
        let Some((doc_id, mut document)) = matched else {
            transaction.rollback()?;
            return Ok(false);
        };
        merge_fields(&mut document, fields);
        let updated = transaction.execute(
            "UPDATE documents SET body_json = ?1 WHERE doc_id = ?2",
            params![serde_json::to_string(&document)?, doc_id],
        )?;
        if updated != 1 {
            return Err(StoreError::InvalidPersistedValue {
                field: "doc_id",
                value: doc_id.to_string(),
            });
        }
        transaction.commit()?;
        Ok(true)
    }

    async fn collection_names(&self, database: &str) -> StoreResult<Vec<String>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT DISTINCT collection_name FROM documents
            WHERE database_name = ?1
            ORDER BY collection_name ASC
            "#,
        )?;
        let mut rows = statement.query(params![database])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get::<_, String>(0)?);
        }
        Ok(names)
    }

    async fn drop_database(&self, database: &str) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "DELETE FROM documents WHERE database_name = ?1",
            params![database],
        )?;
        Ok(())
    }
}
