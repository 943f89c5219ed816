//! Record store for processes and areas.
//!
//! [`CatalogStore`] is what the HTTP layer talks to; [`SqliteStore`] is the
//! single-file SQLite implementation.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::schema::{Area, Process, ProcessFields};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_processes(&self) -> StoreResult<Vec<Process>>;
    async fn get_process(&self, id: i64) -> StoreResult<Option<Process>>;
    /// Direct children of `id`.
    async fn list_children(&self, id: i64) -> StoreResult<Vec<Process>>;
    async fn list_processes_by_area(&self, area_id: i64) -> StoreResult<Vec<Process>>;
    /// Every id on the parent chain above `id`, nearest first. Terminates on
    /// cyclic data.
    async fn ancestor_ids(&self, id: i64) -> StoreResult<Vec<i64>>;
    async fn create_process(&self, fields: &ProcessFields) -> StoreResult<Process>;
    /// Returns `None` when no process has this id.
    async fn update_process(&self, id: i64, fields: &ProcessFields)
        -> StoreResult<Option<Process>>;
    /// Deletes the process and its whole subtree. Returns false if absent.
    async fn delete_process(&self, id: i64) -> StoreResult<bool>;

    async fn list_areas(&self) -> StoreResult<Vec<Area>>;
    async fn get_area(&self, id: i64) -> StoreResult<Option<Area>>;
    async fn create_area(&self, name: &str) -> StoreResult<Area>;
    async fn update_area(&self, id: i64, name: &str) -> StoreResult<Option<Area>>;
    /// Detaches the area's processes (`area_id = NULL`). Returns false if absent.
    async fn delete_area(&self, id: i64) -> StoreResult<bool>;
}

const PROCESS_COLUMNS: &str = "id, parent_process_id, name, description, area_id, \
     related_tools, related_users, status, priority, created_at, updated_at";

const AREA_COLUMNS: &str = "id, name, created_at, updated_at";

/// SQLite-backed catalog.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        let store = Self::from_connection(conn)?;
        info!("Opened SQLite catalog at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Drop every table and recreate the schema. All data is lost.
    pub fn reset(&self) -> StoreResult<()> {
        {
            let conn = self.lock()?;
            conn.execute_batch(
                "DROP TABLE IF EXISTS processes;
                 DROP TABLE IF EXISTS areas;",
            )?;
        }
        self.init_schema()?;
        info!("Catalog tables dropped and recreated");
        Ok(())
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS areas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS processes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_process_id INTEGER REFERENCES processes(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                area_id INTEGER REFERENCES areas(id) ON DELETE SET NULL,
                related_tools TEXT,
                related_users TEXT,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_processes_parent
             ON processes(parent_process_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_processes_area
             ON processes(area_id)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::database("SQLite connection mutex poisoned"))
    }
}

fn process_from_row(row: &Row<'_>) -> rusqlite::Result<Process> {
    Ok(Process {
        id: row.get(0)?,
        parent_process_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        area_id: row.get(4)?,
        related_tools: row.get(5)?,
        related_users: row.get(6)?,
        status: row.get(7)?,
        priority: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn area_from_row(row: &Row<'_>) -> rusqlite::Result<Area> {
    Ok(Area {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn query_processes(
    conn: &Connection,
    filter: &str,
    args: impl rusqlite::Params,
) -> StoreResult<Vec<Process>> {
    let sql = format!("SELECT {} FROM processes {} ORDER BY id", PROCESS_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let processes = stmt
        .query_map(args, process_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(processes)
}

fn fetch_process(conn: &Connection, id: i64) -> StoreResult<Option<Process>> {
    let sql = format!("SELECT {} FROM processes WHERE id = ?1", PROCESS_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], process_from_row)
        .optional()?)
}

fn fetch_area(conn: &Connection, id: i64) -> StoreResult<Option<Area>> {
    let sql = format!("SELECT {} FROM areas WHERE id = ?1", AREA_COLUMNS);
    Ok(conn.query_row(&sql, params![id], area_from_row).optional()?)
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn list_processes(&self) -> StoreResult<Vec<Process>> {
        let conn = self.lock()?;
        let processes = query_processes(&conn, "", [])?;
        debug!("Listed {} processes", processes.len());
        Ok(processes)
    }

    async fn get_process(&self, id: i64) -> StoreResult<Option<Process>> {
        let conn = self.lock()?;
        fetch_process(&conn, id)
    }

    async fn list_children(&self, id: i64) -> StoreResult<Vec<Process>> {
        let conn = self.lock()?;
        query_processes(&conn, "WHERE parent_process_id = ?1", params![id])
    }

    async fn list_processes_by_area(&self, area_id: i64) -> StoreResult<Vec<Process>> {
        let conn = self.lock()?;
        query_processes(&conn, "WHERE area_id = ?1", params![area_id])
    }

    async fn ancestor_ids(&self, id: i64) -> StoreResult<Vec<i64>> {
        let conn = self.lock()?;
        // A chain never has more hops than there are rows, which bounds the
        // walk when the data contains a cycle.
        let mut stmt = conn.prepare(
            "WITH RECURSIVE chain(id, hops) AS (
                SELECT parent_process_id, 1 FROM processes
                 WHERE id = ?1 AND parent_process_id IS NOT NULL
                UNION ALL
                SELECT p.parent_process_id, c.hops + 1 FROM processes p
                  JOIN chain c ON p.id = c.id
                 WHERE p.parent_process_id IS NOT NULL
                   AND c.hops < (SELECT COUNT(*) FROM processes)
            )
            SELECT id FROM chain GROUP BY id ORDER BY MIN(hops)",
        )?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    async fn create_process(&self, fields: &ProcessFields) -> StoreResult<Process> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO processes (parent_process_id, name, description, area_id,
                 related_tools, related_users, status, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                fields.parent_process_id,
                &fields.name,
                &fields.description,
                fields.area_id,
                &fields.related_tools,
                &fields.related_users,
                &fields.status,
                &fields.priority,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(id, name = %fields.name, "Created process");
        fetch_process(&conn, id)?.ok_or_else(|| StoreError::not_found("Process", id))
    }

    async fn update_process(
        &self,
        id: i64,
        fields: &ProcessFields,
    ) -> StoreResult<Option<Process>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE processes SET parent_process_id = ?1, name = ?2, description = ?3,
                 area_id = ?4, related_tools = ?5, related_users = ?6, status = ?7,
                 priority = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                fields.parent_process_id,
                &fields.name,
                &fields.description,
                fields.area_id,
                &fields.related_tools,
                &fields.related_users,
                &fields.status,
                &fields.priority,
                Utc::now(),
                id,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        info!(id, "Updated process");
        fetch_process(&conn, id)
    }

    async fn delete_process(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM processes WHERE id = ?1", params![id])?;
        if deleted > 0 {
            info!(id, "Deleted process");
        }
        Ok(deleted > 0)
    }

    async fn list_areas(&self) -> StoreResult<Vec<Area>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM areas ORDER BY id", AREA_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let areas = stmt
            .query_map([], area_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(areas)
    }

    async fn get_area(&self, id: i64) -> StoreResult<Option<Area>> {
        let conn = self.lock()?;
        fetch_area(&conn, id)
    }

    async fn create_area(&self, name: &str) -> StoreResult<Area> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO areas (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![name, now],
        )?;
        let id = conn.last_insert_rowid();
        info!(id, name, "Created area");
        fetch_area(&conn, id)?.ok_or_else(|| StoreError::not_found("Area", id))
    }

    async fn update_area(&self, id: i64, name: &str) -> StoreResult<Option<Area>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE areas SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, Utc::now(), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        info!(id, name, "Updated area");
        fetch_area(&conn, id)
    }

    async fn delete_area(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM areas WHERE id = ?1", params![id])?;
        if deleted > 0 {
            info!(id, "Deleted area");
        }
        Ok(deleted > 0)
    }
}
