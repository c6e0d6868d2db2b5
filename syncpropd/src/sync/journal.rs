use std::{fs, path::Path, path::PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use syncprop_core::{
    Availability, FileRecord, ItemType, ModelError, PinState, is_descendant_of, parent_path,
};
use thiserror::Error;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectiveSyncList {
    BlackList,
    WhiteList,
    Undecided,
}

impl SelectiveSyncList {
    fn as_str(&self) -> &'static str {
        match self {
            SelectiveSyncList::BlackList => "black",
            SelectiveSyncList::WhiteList => "white",
            SelectiveSyncList::Undecided => "undecided",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub id: i64,
    pub path: String,
    pub conflict_path: String,
    pub created: i64,
    pub reason: String,
}

// Bounds selecting every path strictly below `path` with plain byte ordering:
// "docs/" <= child < "docs0" since '0' follows '/'.
fn descendant_bounds(path: &str) -> (String, String) {
    (format!("{path}/"), format!("{path}0"))
}

fn record_from_row(row: &SqliteRow) -> Result<FileRecord, JournalError> {
    let item_type: String = row.try_get("item_type")?;
    Ok(FileRecord {
        path: row.try_get("path")?,
        item_type: ItemType::parse(&item_type)?,
        size: row.try_get("size")?,
        modtime: row.try_get("modtime")?,
        etag: row.try_get("etag")?,
        file_id: row.try_get("file_id")?,
        checksum_header: row.try_get("checksum_header")?,
    })
}

pub struct SyncJournal {
    pool: SqlitePool,
}

impl SyncJournal {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, JournalError> {
        let pool = SqlitePool::connect(database_url).await?;
        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    pub async fn open(db_path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = SqlitePool::connect_with(options).await?;
        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    pub async fn init(&self) -> Result<(), JournalError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn get_record(&self, path: &str) -> Result<Option<FileRecord>, JournalError> {
        let row = sqlx::query(
            "SELECT path, item_type, size, modtime, etag, file_id, checksum_header FROM metadata WHERE path = ?1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn set_record(&self, record: &FileRecord) -> Result<(), JournalError> {
        sqlx::query(
            "INSERT INTO metadata (path, item_type, size, modtime, etag, file_id, checksum_header)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                item_type = excluded.item_type,
                size = excluded.size,
                modtime = excluded.modtime,
                etag = excluded.etag,
                file_id = excluded.file_id,
                checksum_header = excluded.checksum_header",
        )
        .bind(&record.path)
        .bind(record.item_type.as_str())
        .bind(record.size)
        .bind(record.modtime)
        .bind(&record.etag)
        .bind(&record.file_id)
        .bind(&record.checksum_header)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_record(&self, path: &str, recursively: bool) -> Result<(), JournalError> {
        if recursively {
            let (lower, upper) = descendant_bounds(path);
            sqlx::query("DELETE FROM metadata WHERE path = ?1 OR (path >= ?2 AND path < ?3)")
                .bind(path)
                .bind(lower)
                .bind(upper)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("DELETE FROM metadata WHERE path = ?1")
                .bind(path)
                .execute(&self.pool)
                .await?;
        }
        tracing::debug!(target: "sync.journal", path, recursively, "deleted file record");
        Ok(())
    }

    /// Every statement is committed on its own; this is the point where the
    /// write-ahead log is folded back so the change survives a crash of the host.
    pub async fn commit(&self, label: &str) -> Result<(), JournalError> {
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .execute(&self.pool)
            .await?;
        tracing::debug!(target: "sync.journal", label, "journal commit");
        Ok(())
    }

    pub async fn get_files_below_path<F>(&self, prefix: &str, mut visitor: F) -> Result<(), JournalError>
    where
        F: FnMut(&FileRecord),
    {
        let rows = if prefix.is_empty() {
            sqlx::query(
                "SELECT path, item_type, size, modtime, etag, file_id, checksum_header
                 FROM metadata ORDER BY path ASC",
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            let (lower, upper) = descendant_bounds(prefix);
            sqlx::query(
                "SELECT path, item_type, size, modtime, etag, file_id, checksum_header
                 FROM metadata
                 WHERE path = ?1 OR (path >= ?2 AND path < ?3)
                 ORDER BY path ASC",
            )
            .bind(prefix)
            .bind(lower)
            .bind(upper)
            .fetch_all(&self.pool)
            .await?
        };

        for row in &rows {
            visitor(&record_from_row(row)?);
        }
        Ok(())
    }

    pub async fn raw_pin_state(&self, path: &str) -> Result<Option<PinState>, JournalError> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM pin_states WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(state.as_deref().map(PinState::parse).transpose()?)
    }

    pub async fn effective_pin_state(&self, path: &str) -> Result<Option<PinState>, JournalError> {
        let mut current = Some(path);
        while let Some(candidate) = current {
            if let Some(state) = self.raw_pin_state(candidate).await?
                && state != PinState::Inherited
            {
                return Ok(Some(state));
            }
            current = parent_path(candidate);
        }
        Ok(None)
    }

    /// Contained items lose their explicit states and follow `path` afterwards.
    pub async fn set_pin_state(&self, path: &str, state: PinState) -> Result<(), JournalError> {
        let mut tx = self.pool.begin().await?;
        if path.is_empty() {
            sqlx::query("DELETE FROM pin_states WHERE path <> ''")
                .execute(&mut *tx)
                .await?;
        } else {
            let (lower, upper) = descendant_bounds(path);
            sqlx::query("DELETE FROM pin_states WHERE path >= ?1 AND path < ?2")
                .bind(lower)
                .bind(upper)
                .execute(&mut *tx)
                .await?;
        }
        if state == PinState::Inherited {
            sqlx::query("DELETE FROM pin_states WHERE path = ?1")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "INSERT INTO pin_states (path, state) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET state = excluded.state",
            )
            .bind(path)
            .bind(state.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn availability(&self, path: &str) -> Result<Availability, JournalError> {
        let mut hydrated = 0;
        let mut dehydrated = 0;
        self.get_files_below_path(path, |record| match record.item_type {
            ItemType::File => hydrated += 1,
            ItemType::VirtualFile => dehydrated += 1,
            ItemType::Directory => {}
        })
        .await?;
        Ok(Availability::from_counts(hydrated, dehydrated))
    }

    pub async fn selective_sync_list(
        &self,
        list: SelectiveSyncList,
    ) -> Result<Vec<String>, JournalError> {
        let paths = sqlx::query_scalar("SELECT path FROM selective_sync WHERE list = ?1 ORDER BY path ASC")
            .bind(list.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    pub async fn set_selective_sync_list(
        &self,
        list: SelectiveSyncList,
        paths: &[String],
    ) -> Result<(), JournalError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM selective_sync WHERE list = ?1")
            .bind(list.as_str())
            .execute(&mut *tx)
            .await?;
        for path in paths {
            sqlx::query("INSERT OR IGNORE INTO selective_sync (list, path) VALUES (?1, ?2)")
                .bind(list.as_str())
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Keeps the exclusion list pointing at the same folders after `from` moved to `to`.
    pub async fn adjust_selective_sync(&self, from: &str, to: &str) -> Result<(), JournalError> {
        let black_list = self.selective_sync_list(SelectiveSyncList::BlackList).await?;
        let mut changed = false;
        let adjusted: Vec<String> = black_list
            .into_iter()
            .map(|entry| {
                if entry == from {
                    changed = true;
                    to.to_string()
                } else if is_descendant_of(&entry, from) {
                    changed = true;
                    format!("{to}{}", &entry[from.len()..])
                } else {
                    entry
                }
            })
            .collect();
        if changed {
            self.set_selective_sync_list(SelectiveSyncList::BlackList, &adjusted)
                .await?;
        }
        Ok(())
    }

    pub async fn record_conflict(
        &self,
        path: &str,
        conflict_path: &str,
        created: i64,
        reason: &str,
    ) -> Result<i64, JournalError> {
        let result = sqlx::query(
            "INSERT INTO conflicts (path, conflict_path, created, reason) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(path)
        .bind(conflict_path)
        .bind(created)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, JournalError> {
        let rows = sqlx::query(
            "SELECT id, path, conflict_path, created, reason FROM conflicts ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ConflictRecord {
                id: row.try_get("id")?,
                path: row.try_get("path")?,
                conflict_path: row.try_get("conflict_path")?,
                created: row.try_get("created")?,
                reason: row.try_get("reason")?,
            });
        }
        Ok(out)
    }
}

pub fn default_journal_path() -> Result<PathBuf, JournalError> {
    let mut path = dirs::data_dir().ok_or(JournalError::MissingDataDir)?;
    path.push("syncprop");
    path.push("journal.db");
    Ok(path)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
