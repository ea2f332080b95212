use crate::client::{
    CollectionHandle, ConnectionHandle, Cursor, DatabaseHandle, StoreClient, UpdateOptions,
};
use crate::document::{RawDocument, ID_FIELD};
use crate::error::{DocBindError, Result};
use crate::query::{self, Filter};
use crate::schema::IndexSpec;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Document store backed by SQLite: one database per (host, port) target.
/// Logical databases and collections are columns of a single `documents` table.
#[derive(Debug, Clone)]
pub struct SqliteClient {
    root: Option<PathBuf>,
}

impl SqliteClient {
    /// Store each (host, port) target in `<root>/<host>_<port>.db`.
    pub fn open_dir(root: impl Into<PathBuf>) -> Self {
        SqliteClient {
            root: Some(root.into()),
        }
    }

    /// Every connection gets its own in-memory database (for testing).
    pub fn in_memory() -> Self {
        SqliteClient { root: None }
    }
}

impl StoreClient for SqliteClient {
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn ConnectionHandle>> {
        let path = self
            .root
            .as_ref()
            .map(|root| root.join(format!("{}_{}.db", sanitize(host), port)));
        Ok(Arc::new(SqliteConnection {
            inner: Arc::new(Inner {
                host: host.to_string(),
                port,
                path,
                conn: Mutex::new(None),
            }),
        }))
    }
}

fn sanitize(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

struct Inner {
    host: String,
    port: u16,
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl Inner {
    /// Run `f` against the connection, opening it on first use.
    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(DocBindError::Other("SQLite connection unavailable".into())),
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                log::debug!("Opening SQLite store {}", path.display());
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        initialize_tables(&conn)?;
        Ok(conn)
    }

    fn is_open(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

fn initialize_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            db_name TEXT NOT NULL,
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data_json TEXT NOT NULL,
            PRIMARY KEY (db_name, collection, id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(db_name, collection);

        CREATE TABLE IF NOT EXISTS index_specs (
            db_name TEXT NOT NULL,
            collection TEXT NOT NULL,
            name TEXT NOT NULL,
            spec_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (db_name, collection, name)
        );
        ",
    )?;
    Ok(())
}

/// Lazy connection handle. Nothing is opened until the first store operation.
pub struct SqliteConnection {
    inner: Arc<Inner>,
}

impl ConnectionHandle for SqliteConnection {
    fn host(&self) -> &str {
        &self.inner.host
    }

    fn port(&self) -> u16 {
        self.inner.port
    }

    fn is_connected(&self) -> bool {
        self.inner.is_open()
    }

    fn database(&self, name: &str) -> Result<Arc<dyn DatabaseHandle>> {
        Ok(Arc::new(SqliteDatabase {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        }))
    }
}

pub struct SqliteDatabase {
    inner: Arc<Inner>,
    name: String,
}

impl DatabaseHandle for SqliteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Result<Arc<dyn CollectionHandle>> {
        Ok(Arc::new(SqliteCollection {
            inner: Arc::clone(&self.inner),
            database: self.name.clone(),
            name: name.to_string(),
        }))
    }

    fn collection_names(&self) -> Result<Vec<String>> {
        self.inner.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT collection FROM documents WHERE db_name = ?1 ORDER BY collection",
            )?;
            let rows = stmt.query_map(params![self.name], |row| row.get(0))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(row?);
            }
            Ok(names)
        })
    }
}

pub struct SqliteCollection {
    inner: Arc<Inner>,
    database: String,
    name: String,
}

/// Storage key of an identifier: its canonical JSON text.
fn id_key(id: &Value) -> Result<String> {
    Ok(serde_json::to_string(id)?)
}

fn parse_document(data_json: &str) -> Result<RawDocument> {
    match serde_json::from_str(data_json)? {
        Value::Object(map) => Ok(map),
        _ => Err(DocBindError::Other(format!(
            "Stored document is not a JSON object: {data_json}"
        ))),
    }
}

/// Values of the indexed fields, or `None` when a sparse index skips the document.
fn index_key(doc: &RawDocument, spec: &IndexSpec) -> Option<Vec<Value>> {
    let values: Vec<Option<&Value>> = spec.fields().map(|f| query::lookup(doc, f)).collect();
    if spec.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(values.into_iter().map(|v| v.cloned().unwrap_or(Value::Null)).collect())
}

impl SqliteCollection {
    /// All documents of this collection with their storage keys, in insertion order.
    fn load_rows(&self, conn: &Connection) -> Result<Vec<(String, RawDocument)>> {
        let mut stmt = conn.prepare(
            "SELECT id, data_json FROM documents WHERE db_name = ?1 AND collection = ?2 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![self.database, self.name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, data_json) = row?;
            docs.push((id, parse_document(&data_json)?));
        }
        Ok(docs)
    }

    fn load_by_id(&self, conn: &Connection, id: &Value) -> Result<Option<RawDocument>> {
        let data_json: Option<String> = conn
            .query_row(
                "SELECT data_json FROM documents WHERE db_name = ?1 AND collection = ?2 AND id = ?3",
                params![self.database, self.name, id_key(id)?],
                |row| row.get(0),
            )
            .optional()?;
        data_json.as_deref().map(parse_document).transpose()
    }

    fn matching_rows(&self, conn: &Connection, filter: &Filter) -> Result<Vec<(String, RawDocument)>> {
        if let Some(id) = query::id_only(filter) {
            let key = id_key(id)?;
            return Ok(self
                .load_by_id(conn, id)?
                .map(|doc| vec![(key, doc)])
                .unwrap_or_default());
        }
        Ok(self
            .load_rows(conn)?
            .into_iter()
            .filter(|(_, doc)| query::matches(doc, filter))
            .collect())
    }

    fn load_specs(&self, conn: &Connection) -> Result<Vec<IndexSpec>> {
        let mut stmt = conn.prepare(
            "SELECT spec_json FROM index_specs WHERE db_name = ?1 AND collection = ?2 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![self.database, self.name], |row| row.get::<_, String>(0))?;
        let mut specs = Vec::new();
        for row in rows {
            specs.push(serde_json::from_str(&row?)?);
        }
        Ok(specs)
    }

    /// Reject `doc` if it collides with another document on a unique index.
    fn check_unique(&self, conn: &Connection, doc: &RawDocument, key: &str) -> Result<()> {
        let unique: Vec<IndexSpec> = self
            .load_specs(conn)?
            .into_iter()
            .filter(|s| s.unique)
            .collect();
        if unique.is_empty() {
            return Ok(());
        }

        let others = self.load_rows(conn)?;
        for spec in &unique {
            let Some(values) = index_key(doc, spec) else {
                continue;
            };
            let collides = others
                .iter()
                .filter(|(other_key, _)| other_key != key)
                .any(|(_, other)| index_key(other, spec).as_ref() == Some(&values));
            if collides {
                return Err(DocBindError::DuplicateKey {
                    collection: self.name.clone(),
                    index: spec.index_name(),
                });
            }
        }
        Ok(())
    }

    fn write(&self, conn: &Connection, key: &str, doc: &RawDocument) -> Result<()> {
        let data_json = serde_json::to_string(doc)?;
        conn.execute(
            "INSERT INTO documents (db_name, collection, id, data_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (db_name, collection, id) DO UPDATE SET data_json = excluded.data_json",
            params![self.database, self.name, key, data_json],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection, key: &str) -> Result<u64> {
        let removed = conn.execute(
            "DELETE FROM documents WHERE db_name = ?1 AND collection = ?2 AND id = ?3",
            params![self.database, self.name, key],
        )?;
        Ok(removed as u64)
    }
}

impl CollectionHandle for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    fn ensure_index(&self, spec: &IndexSpec) -> Result<()> {
        let name = spec.index_name();
        self.inner.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT spec_json FROM index_specs WHERE db_name = ?1 AND collection = ?2 AND name = ?3",
                    params![self.database, self.name, name],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing) = existing {
                let existing: IndexSpec = serde_json::from_str(&existing)?;
                if existing.is_equivalent(spec) {
                    return Ok(());
                }
                return Err(DocBindError::IndexConflict {
                    collection: self.name.clone(),
                    index: name,
                });
            }

            if spec.unique {
                let docs = self.load_rows(conn)?;
                let mut seen: Vec<Vec<Value>> = Vec::new();
                for (_, doc) in &docs {
                    if let Some(values) = index_key(doc, spec) {
                        if seen.contains(&values) {
                            return Err(DocBindError::DuplicateKey {
                                collection: self.name.clone(),
                                index: name,
                            });
                        }
                        seen.push(values);
                    }
                }
            }

            let stored = spec.clone().named(&name);
            conn.execute(
                "INSERT INTO index_specs (db_name, collection, name, spec_json) VALUES (?1, ?2, ?3, ?4)",
                params![self.database, self.name, name, serde_json::to_string(&stored)?],
            )?;
            Ok(())
        })
    }

    fn index_information(&self) -> Result<Vec<IndexSpec>> {
        self.inner.with_conn(|conn| self.load_specs(conn))
    }

    fn find_one(&self, filter: &Filter, fields: Option<&[String]>) -> Result<Option<RawDocument>> {
        self.inner.with_conn(|conn| {
            let found = self.matching_rows(conn, filter)?.into_iter().next();
            Ok(found.map(|(_, doc)| match fields {
                Some(fields) => query::project(&doc, fields),
                None => doc,
            }))
        })
    }

    fn find(&self, filter: &Filter) -> Result<Cursor> {
        self.inner.with_conn(|conn| {
            let docs = self
                .matching_rows(conn, filter)?
                .into_iter()
                .map(|(_, doc)| doc)
                .collect();
            Ok(Cursor::new(docs))
        })
    }

    fn update(&self, filter: &Filter, update: &Value, options: UpdateOptions) -> Result<u64> {
        self.inner.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut rows = self.matching_rows(&tx, filter)?;
            if !options.multi {
                rows.truncate(1);
            }

            if rows.is_empty() {
                if !options.upsert {
                    return Ok(0);
                }
                let mut doc = query::literal_conditions(filter);
                query::apply_update(&mut doc, update)?;
                let id = match doc.get(ID_FIELD) {
                    Some(id) => id.clone(),
                    None => {
                        let id = Value::String(ulid::Ulid::new().to_string().to_lowercase());
                        doc.insert(ID_FIELD.to_string(), id.clone());
                        id
                    }
                };
                let key = id_key(&id)?;
                self.check_unique(&tx, &doc, &key)?;
                self.write(&tx, &key, &doc)?;
                tx.commit()?;
                return Ok(1);
            }

            let mut modified = 0;
            for (key, mut doc) in rows {
                query::apply_update(&mut doc, update)?;
                self.check_unique(&tx, &doc, &key)?;
                self.write(&tx, &key, &doc)?;
                modified += 1;
            }
            tx.commit()?;
            Ok(modified)
        })
    }

    fn remove(&self, filter: &Filter) -> Result<u64> {
        self.inner.with_conn(|conn| {
            if let Some(id) = query::id_only(filter) {
                return self.delete(conn, &id_key(id)?);
            }
            let tx = conn.unchecked_transaction()?;
            let mut removed = 0;
            for (key, _) in self.matching_rows(&tx, filter)? {
                removed += self.delete(&tx, &key)?;
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    fn save(&self, document: &RawDocument) -> Result<()> {
        let id = document
            .get(ID_FIELD)
            .ok_or_else(|| DocBindError::Other(format!("Cannot save into {} without _id", self.name)))?;
        let key = id_key(id)?;
        self.inner.with_conn(|conn| {
            self.check_unique(conn, document, &key)?;
            self.write(conn, &key, document)
        })
    }
}
