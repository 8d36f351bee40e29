//! Persisted layout store: one relational table of placed-item rows plus a
//! small meta table for id high-water marks and grid bookkeeping.
//!
//! The store is a thin gateway, not a database engine. It is only ever
//! touched from the background worker; batched mutations run inside
//! explicit transactions.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use hearth_model::{GridSpec, ItemId, ScreenId, NO_ID};

/// One persisted layout row, in raw (unreconciled) form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutRow {
    pub id: ItemId,
    pub container: ItemId,
    pub screen: ScreenId,
    pub cell_x: i32,
    pub cell_y: i32,
    pub span_x: i32,
    pub span_y: i32,
    /// `ItemKind` tag; kept raw so unknown tags surface as row defects
    /// instead of deserialization failures.
    pub item_type: i64,
    pub profile_serial: i64,
    pub restore_flags: u32,
    /// Flat component form or deep-shortcut JSON, depending on item_type.
    pub intent: Option<String>,
    /// Widget provider identity.
    pub provider: Option<String>,
    pub title: Option<String>,
    pub icon: Option<Vec<u8>>,
    /// Last-modified stamp, unix millis. Set by the store on every write.
    pub modified: i64,
}

impl LayoutRow {
    pub fn new(item_type: i64, container: ItemId, screen: ScreenId) -> Self {
        Self {
            id: NO_ID,
            container,
            screen,
            cell_x: 0,
            cell_y: 0,
            span_x: 1,
            span_y: 1,
            item_type,
            profile_serial: 0,
            restore_flags: 0,
            intent: None,
            provider: None,
            title: None,
            icon: None,
            modified: 0,
        }
    }
}

/// Outcome of a grid migration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub kept: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct LayoutStore {
    db_path: PathBuf,
}

const META_MAX_ITEM_ID: &str = "max_item_id";
const META_MAX_SCREEN_ID: &str = "max_screen_id";
const META_GRID_SPEC: &str = "grid_spec";
const META_MIGRATION_ATTEMPTED: &str = "migration_attempted";

impl LayoutStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let db_path = dir.join("layout.sqlite");
        let store = Self { db_path };
        let conn = store.conn()?;
        Self::init_schema(&conn)?;
        Ok(store)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workspace_items (
              id INTEGER PRIMARY KEY,
              container INTEGER NOT NULL,
              screen INTEGER NOT NULL,
              cell_x INTEGER NOT NULL,
              cell_y INTEGER NOT NULL,
              span_x INTEGER NOT NULL DEFAULT 1,
              span_y INTEGER NOT NULL DEFAULT 1,
              item_type INTEGER NOT NULL,
              profile_serial INTEGER NOT NULL DEFAULT 0,
              restore_flags INTEGER NOT NULL DEFAULT 0,
              intent TEXT,
              provider TEXT,
              title TEXT,
              icon BLOB,
              modified INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_items_container ON workspace_items(container);
            CREATE INDEX IF NOT EXISTS idx_items_screen ON workspace_items(screen);

            CREATE TABLE IF NOT EXISTS meta (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Busy timeout (default 5000ms; override with HEARTH_SQLITE_BUSY_MS)
        let busy_ms: u64 = std::env::var("HEARTH_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Every persisted row, in stable id order. The loader walks this once
    /// per load pass.
    pub fn query_all(&self) -> Result<Vec<LayoutRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,container,screen,cell_x,cell_y,span_x,span_y,item_type,profile_serial,\
             restore_flags,intent,provider,title,icon,modified \
             FROM workspace_items ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(LayoutRow {
                id: row.get(0)?,
                container: row.get(1)?,
                screen: row.get(2)?,
                cell_x: row.get(3)?,
                cell_y: row.get(4)?,
                span_x: row.get(5)?,
                span_y: row.get(6)?,
                item_type: row.get(7)?,
                profile_serial: row.get(8)?,
                restore_flags: row.get(9)?,
                intent: row.get(10)?,
                provider: row.get(11)?,
                title: row.get(12)?,
                icon: row.get(13)?,
                modified: row.get(14)?,
            });
        }
        Ok(out)
    }

    /// Insert a row, assigning a fresh id when the row carries `NO_ID`.
    /// Returns the effective id.
    pub fn insert(&self, row: &mut LayoutRow) -> Result<ItemId> {
        if row.id == NO_ID {
            row.id = self.generate_new_item_id()?;
        }
        row.modified = now_millis();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO workspace_items\
             (id,container,screen,cell_x,cell_y,span_x,span_y,item_type,profile_serial,\
              restore_flags,intent,provider,title,icon,modified)\
             VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
            params![
                row.id,
                row.container,
                row.screen,
                row.cell_x,
                row.cell_y,
                row.span_x,
                row.span_y,
                row.item_type,
                row.profile_serial,
                row.restore_flags,
                row.intent,
                row.provider,
                row.title,
                row.icon,
                row.modified,
            ],
        )?;
        Ok(row.id)
    }

    /// Re-persist placement and title for an existing row.
    pub fn update_placement(
        &self,
        id: ItemId,
        container: ItemId,
        screen: ScreenId,
        cell_x: i32,
        cell_y: i32,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE workspace_items SET container=?, screen=?, cell_x=?, cell_y=?, modified=? WHERE id=?",
            params![container, screen, cell_x, cell_y, now_millis(), id],
        )?;
        Ok(n > 0)
    }

    /// Delete the given rows in one transaction. Re-running with the same
    /// ids is a no-op.
    pub fn delete_ids(&self, ids: &[ItemId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0usize;
        {
            let mut stmt = tx.prepare("DELETE FROM workspace_items WHERE id=?")?;
            for id in ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Clear the restore bitmask on the given rows in one transaction.
    /// Idempotent; already-clear rows are left untouched.
    pub fn clear_restore_flags(&self, ids: &[ItemId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut cleared = 0usize;
        {
            let mut stmt = tx.prepare(
                "UPDATE workspace_items SET restore_flags=0, modified=? WHERE id=? AND restore_flags!=0",
            )?;
            for id in ids {
                cleared += stmt.execute(params![now_millis(), id])?;
            }
        }
        tx.commit()?;
        Ok(cleared)
    }

    /// Next item id. Monotonic and collision-free across process restarts:
    /// the high-water mark is persisted in the meta table and never reused
    /// even after rows are deleted.
    pub fn generate_new_item_id(&self) -> Result<ItemId> {
        self.next_id(META_MAX_ITEM_ID, "SELECT MAX(id) FROM workspace_items")
    }

    pub fn new_screen_id(&self) -> Result<ScreenId> {
        self.next_id(
            META_MAX_SCREEN_ID,
            "SELECT MAX(screen) FROM workspace_items WHERE container=-100",
        )
    }

    fn next_id(&self, meta_key: &str, max_query: &str) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let persisted: i64 = tx
            .query_row("SELECT value FROM meta WHERE key=?", [meta_key], |r| {
                r.get::<_, String>(0)
            })
            .optional()?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let table_max: i64 = tx
            .query_row(max_query, [], |r| r.get::<_, Option<i64>>(0))?
            .unwrap_or(0);
        let next = persisted.max(table_max) + 1;
        tx.execute(
            "INSERT OR REPLACE INTO meta(key,value) VALUES(?,?)",
            params![meta_key, next.to_string()],
        )?;
        tx.commit()?;
        Ok(next)
    }

    /// Drop all layout rows but keep the id high-water marks, so ids stay
    /// monotonic across a reset.
    pub fn reset(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM workspace_items", [])?;
        conn.execute(
            "DELETE FROM meta WHERE key NOT IN (?,?)",
            params![META_MAX_ITEM_ID, META_MAX_SCREEN_ID],
        )?;
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM workspace_items", [], |r| r.get(0))?;
        Ok(n == 0)
    }

    /// Grid dimensions the persisted rows were written under, if recorded.
    pub fn grid_spec(&self) -> Result<Option<GridSpec>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key=?",
                [META_GRID_SPEC],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub fn set_grid_spec(&self, grid: &GridSpec) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta(key,value) VALUES(?,?)",
            params![META_GRID_SPEC, serde_json::to_string(grid)?],
        )?;
        Ok(())
    }

    /// Whether a migration between these dimensions was already attempted.
    /// Each mismatch is tried once; repeated failures must not loop.
    pub fn migration_attempted(&self, src: &GridSpec, dst: &GridSpec) -> Result<bool> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key=?",
                [META_MIGRATION_ATTEMPTED],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.as_deref() == Some(migration_key(src, dst).as_str()))
    }

    fn record_migration_attempt(&self, src: &GridSpec, dst: &GridSpec) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta(key,value) VALUES(?,?)",
            params![META_MIGRATION_ATTEMPTED, migration_key(src, dst)],
        )?;
        Ok(())
    }

    /// Migrate persisted rows from `src` grid dimensions to `dst` in one
    /// transaction. Desktop rows whose rect no longer fits and hotseat rows
    /// beyond the new capacity are dropped; collection contents are
    /// untouched. On success the recorded grid spec becomes `dst`.
    pub fn migrate(&self, src: &GridSpec, dst: &GridSpec) -> Result<MigrationReport> {
        tracing::info!(?src, ?dst, "migrating layout grid");
        self.record_migration_attempt(src, dst)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let dropped = tx.execute(
            "DELETE FROM workspace_items WHERE container=-100 AND \
             (cell_x + span_x > ?1 OR cell_y + span_y > ?2)",
            params![dst.columns, dst.rows],
        )?;
        let dropped_hotseat = tx.execute(
            "DELETE FROM workspace_items WHERE container=-101 AND screen >= ?1",
            params![dst.hotseat_size],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO meta(key,value) VALUES(?,?)",
            params![META_GRID_SPEC, serde_json::to_string(dst)?],
        )?;
        let kept: i64 = tx.query_row("SELECT COUNT(*) FROM workspace_items", [], |r| r.get(0))?;
        tx.commit()?;
        Ok(MigrationReport {
            kept: kept as usize,
            dropped: dropped + dropped_hotseat,
        })
    }
}

fn migration_key(src: &GridSpec, dst: &GridSpec) -> String {
    format!(
        "{}x{}:{}->{}x{}:{}",
        src.columns, src.rows, src.hotseat_size, dst.columns, dst.rows, dst.hotseat_size
    )
}

pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
