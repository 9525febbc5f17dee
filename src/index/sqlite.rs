//! SQLite sidecar implementation.
//!
//! Schema:
//! - `ledger_index_state(id=1, last_commit, last_state_tree)` singleton row
//! - `collection_registry(collection PK, table_name UNIQUE)`
//! - per-collection `collection_<name>` tables keyed by doc_id
//!
//! Identifiers are double-quoted everywhere a table name is interpolated.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::error::IndexError;
use super::{DocRecord, SidecarStore, SidecarTx, SyncState};

pub struct SqliteIndex {
    conn: Connection,
}

impl SqliteIndex {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(IndexError::SidecarIo)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, IndexError> {
        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<(), IndexError> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS ledger_index_state (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 last_commit TEXT NOT NULL DEFAULT '',
                 last_state_tree TEXT NOT NULL DEFAULT ''
             );
             CREATE TABLE IF NOT EXISTS collection_registry (
                 collection TEXT PRIMARY KEY,
                 table_name TEXT NOT NULL UNIQUE
             );",
        )?;
        self.ensure_state_columns()?;
        self.conn.execute(
            "INSERT OR IGNORE INTO ledger_index_state (id, last_commit, last_state_tree)
             VALUES (1, '', '')",
            [],
        )?;
        Ok(())
    }

    /// Upgrade path for sidecars created before state-mode sync existed.
    fn ensure_state_columns(&self) -> Result<(), IndexError> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(ledger_index_state)")?;
        let mut has_state_tree = false;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == "last_state_tree" {
                has_state_tree = true;
            }
        }
        drop(rows);
        drop(stmt);

        if !has_state_tree {
            self.conn.execute(
                "ALTER TABLE ledger_index_state
                 ADD COLUMN last_state_tree TEXT NOT NULL DEFAULT ''",
                [],
            )?;
        }
        Ok(())
    }
}

impl SidecarStore for SqliteIndex {
    fn get_state(&mut self) -> Result<SyncState, IndexError> {
        let state = self
            .conn
            .query_row(
                "SELECT last_commit, last_state_tree FROM ledger_index_state WHERE id = 1",
                [],
                |row| {
                    Ok(SyncState {
                        last_commit: row.get(0)?,
                        last_state_tree: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or_default())
    }

    fn begin<'a>(&'a mut self) -> Result<Box<dyn SidecarTx + 'a>, IndexError> {
        let tx = self.conn.transaction()?;
        Ok(Box::new(SqliteTx {
            tx,
            tables: HashMap::new(),
        }))
    }

    fn reset(&mut self) -> Result<(), IndexError> {
        let tx = self.conn.transaction()?;
        let tables: Vec<String> = {
            let mut stmt = tx.prepare("SELECT table_name FROM collection_registry")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for table in tables {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table)))?;
        }
        tx.execute("DELETE FROM collection_registry", [])?;
        tx.execute(
            "UPDATE ledger_index_state SET last_commit = '', last_state_tree = '' WHERE id = 1",
            [],
        )?;
        tx.commit()?;
        tracing::info!("sidecar reset");
        Ok(())
    }
}

struct SqliteTx<'conn> {
    tx: rusqlite::Transaction<'conn>,
    tables: HashMap<String, String>,
}

impl SqliteTx<'_> {
    fn lookup_collection(&mut self, collection: &str) -> Result<Option<String>, IndexError> {
        if let Some(table) = self.tables.get(collection) {
            return Ok(Some(table.clone()));
        }
        let table: Option<String> = self
            .tx
            .query_row(
                "SELECT table_name FROM collection_registry WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(table) = &table {
            self.tables
                .insert(collection.to_string(), table.clone());
        }
        Ok(table)
    }
}

impl SidecarTx for SqliteTx<'_> {
    fn ensure_collection(&mut self, collection: &str) -> Result<String, IndexError> {
        if let Some(table) = self.lookup_collection(collection)? {
            return Ok(table);
        }

        let table = format!("collection_{collection}");
        self.tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                 doc_id TEXT PRIMARY KEY,
                 payload BLOB,
                 tx_hash TEXT NOT NULL,
                 tx_id TEXT NOT NULL,
                 op TEXT NOT NULL,
                 schema_version TEXT,
                 updated_at INTEGER NOT NULL,
                 deleted INTEGER NOT NULL CHECK (deleted IN (0, 1))
             )",
            quote_ident(&table)
        ))?;
        self.tx.execute(
            "INSERT INTO collection_registry (collection, table_name) VALUES (?1, ?2)",
            params![collection, table],
        )?;
        self.tables
            .insert(collection.to_string(), table.clone());
        Ok(table)
    }

    fn get_doc(
        &mut self,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<DocRecord>, IndexError> {
        let Some(table) = self.lookup_collection(collection)? else {
            return Ok(None);
        };

        let query = format!(
            "SELECT doc_id, payload, tx_hash, tx_id, op, schema_version, updated_at, deleted
             FROM {} WHERE doc_id = ?1",
            quote_ident(&table)
        );
        let record = self
            .tx
            .query_row(&query, params![doc_id], |row| {
                Ok(DocRecord {
                    doc_id: row.get(0)?,
                    payload: row.get(1)?,
                    tx_hash: row.get(2)?,
                    tx_id: row.get(3)?,
                    op: row.get(4)?,
                    schema_version: row.get(5)?,
                    updated_at: row.get(6)?,
                    deleted: row.get::<_, i64>(7)? != 0,
                })
            })
            .optional()?;
        Ok(record)
    }

    fn upsert_doc(&mut self, collection: &str, record: &DocRecord) -> Result<(), IndexError> {
        let Some(table) = self.lookup_collection(collection)? else {
            return Err(IndexError::CollectionNotInitialized {
                collection: collection.to_string(),
            });
        };

        let query = format!(
            "INSERT INTO {} (doc_id, payload, tx_hash, tx_id, op, schema_version, updated_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(doc_id) DO UPDATE SET
                 payload = excluded.payload,
                 tx_hash = excluded.tx_hash,
                 tx_id = excluded.tx_id,
                 op = excluded.op,
                 schema_version = excluded.schema_version,
                 updated_at = excluded.updated_at,
                 deleted = excluded.deleted",
            quote_ident(&table)
        );
        self.tx.execute(
            &query,
            params![
                record.doc_id,
                record.payload,
                record.tx_hash,
                record.tx_id,
                record.op,
                record.schema_version,
                record.updated_at,
                record.deleted as i64,
            ],
        )?;
        Ok(())
    }

    fn set_state(&mut self, state: &SyncState) -> Result<(), IndexError> {
        self.tx.execute(
            "INSERT INTO ledger_index_state (id, last_commit, last_state_tree)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 last_commit = excluded.last_commit,
                 last_state_tree = excluded.last_state_tree",
            params![state.last_commit, state.last_state_tree],
        )?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), IndexError> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), IndexError> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
