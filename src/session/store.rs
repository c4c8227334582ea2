use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{
    EventRecord, GuestRecord, PhotoRecord, RecordedPhoto, Reconciliation, SessionStatus,
    UploadSession,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

const SCHEMA: [&str; 7] = [
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        storage_limit_mb INTEGER,
        storage_used_bytes INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS guests (
        id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL REFERENCES events(id),
        name TEXT NOT NULL,
        guest_token TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS upload_sessions (
        id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL REFERENCES events(id),
        guest_id TEXT NOT NULL REFERENCES guests(id),
        total_files INTEGER NOT NULL,
        uploaded_files INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS photos (
        id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL REFERENCES events(id),
        guest_id TEXT NOT NULL REFERENCES guests(id),
        upload_session_id TEXT NOT NULL REFERENCES upload_sessions(id),
        storage_path TEXT NOT NULL,
        url TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (upload_session_id, storage_path)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_guests_event ON guests(event_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_event ON upload_sessions(event_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_photos_event ON photos(event_id, created_at)",
];

/// Events, guests, sessions and photos on SQLite
pub struct UploadStore {
    pool: SqlitePool,
}

impl UploadStore {
    /// Open (creating if needed) the database at `database_url`
    pub async fn new(database_url: &str) -> SessionResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` is its own database
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Create store with in-memory database (for testing)
    pub async fn new_in_memory() -> SessionResult<Self> {
        Self::new("sqlite::memory:").await
    }

    // ============== Events ==============

    pub async fn create_event(
        &self,
        name: &str,
        storage_limit_mb: Option<i64>,
    ) -> SessionResult<EventRecord> {
        let event = EventRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            is_active: true,
            storage_limit_mb,
            storage_used_bytes: 0,
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            "INSERT INTO events (id, name, is_active, storage_limit_mb, storage_used_bytes, created_at) VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&event.id)
        .bind(&event.name)
        .bind(event.is_active)
        .bind(event.storage_limit_mb)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    pub async fn get_event(&self, event_id: &str) -> SessionResult<Option<EventRecord>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| event_from_row(&r)).transpose()
    }

    pub async fn set_event_active(&self, event_id: &str, is_active: bool) -> SessionResult<()> {
        let result = sqlx::query("UPDATE events SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound(event_id.to_string()));
        }
        Ok(())
    }

    /// Add to an event's storage usage; returns the new total in bytes
    pub async fn increment_storage(&self, event_id: &str, bytes: u64) -> SessionResult<u64> {
        let mut conn = self.pool.acquire().await?;
        add_storage(&mut *conn, event_id, bytes).await
    }

    // ============== Guests ==============

    /// Register a guest with a fresh opaque token
    pub async fn create_guest(&self, event_id: &str, name: &str) -> SessionResult<GuestRecord> {
        let guest = GuestRecord {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            name: name.to_string(),
            guest_token: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            "INSERT INTO guests (id, event_id, name, guest_token, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&guest.id)
        .bind(&guest.event_id)
        .bind(&guest.name)
        .bind(&guest.guest_token)
        .bind(guest.created_at)
        .execute(&self.pool)
        .await?;

        Ok(guest)
    }

    pub async fn get_guest(&self, guest_id: &str) -> SessionResult<Option<GuestRecord>> {
        let row = sqlx::query("SELECT * FROM guests WHERE id = ?")
            .bind(guest_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| guest_from_row(&r)).transpose()
    }

    /// The guest matching all three values exactly, if any
    pub async fn find_guest(
        &self,
        guest_id: &str,
        guest_token: &str,
        event_id: &str,
    ) -> SessionResult<Option<GuestRecord>> {
        let row = sqlx::query(
            "SELECT * FROM guests WHERE id = ? AND guest_token = ? AND event_id = ?",
        )
        .bind(guest_id)
        .bind(guest_token)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| guest_from_row(&r)).transpose()
    }

    // ============== Sessions ==============

    pub async fn create_session(
        &self,
        event_id: &str,
        guest_id: &str,
        total_files: u32,
    ) -> SessionResult<UploadSession> {
        let now = chrono::Utc::now().timestamp();
        let session = UploadSession {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            guest_id: guest_id.to_string(),
            total_files,
            uploaded_files: 0,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO upload_sessions
            (id, event_id, guest_id, total_files, uploaded_files, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.event_id)
        .bind(&session.guest_id)
        .bind(session.total_files)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn load_session(&self, session_id: &str) -> SessionResult<Option<UploadSession>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    pub async fn list_sessions(&self, event_id: &str) -> SessionResult<Vec<UploadSession>> {
        let rows = sqlx::query("SELECT * FROM upload_sessions WHERE event_id = ? ORDER BY created_at")
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(session_from_row).collect()
    }

    pub async fn delete_session(&self, session_id: &str) -> SessionResult<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete sessions still active after `max_age_secs`; their URLs have long expired
    pub async fn cleanup_stale_sessions(&self, max_age_secs: i64) -> SessionResult<u64> {
        let cutoff = chrono::Utc::now().timestamp() - max_age_secs;

        let result = sqlx::query(
            r#"
            DELETE FROM upload_sessions
            WHERE status = ? AND updated_at < ?
            AND NOT EXISTS (SELECT 1 FROM photos WHERE photos.upload_session_id = upload_sessions.id)
            "#,
        )
        .bind(SessionStatus::Active.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ============== Photos ==============

    /// Storage paths already recorded for a session
    pub async fn recorded_paths(&self, session_id: &str) -> SessionResult<HashSet<String>> {
        let rows = sqlx::query("SELECT storage_path FROM photos WHERE upload_session_id = ?")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("storage_path").map_err(SessionError::from))
            .collect()
    }

    /// Close a session in one transaction: insert its photo records
    /// (skipping paths already recorded), add the bytes of the newly
    /// inserted paths to the event's usage and mark the session completed.
    ///
    /// `sizes` maps storage paths to their stored size; unknown paths count
    /// as zero. Nothing is written unless every step succeeds.
    pub async fn reconcile_session(
        &self,
        session: &UploadSession,
        photos: &[PhotoRecord],
        sizes: &HashMap<String, u64>,
    ) -> SessionResult<Reconciliation> {
        let mut tx = self.pool.begin().await?;
        let mut recorded = Vec::with_capacity(photos.len());
        let mut stored_bytes = 0u64;

        for photo in photos {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO photos
                (id, event_id, guest_id, upload_session_id, storage_path, url, original_filename, status, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&photo.id)
            .bind(&photo.event_id)
            .bind(&photo.guest_id)
            .bind(&photo.upload_session_id)
            .bind(&photo.storage_path)
            .bind(&photo.url)
            .bind(&photo.original_filename)
            .bind(&photo.status)
            .bind(photo.created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                let size = sizes.get(&photo.storage_path).copied().unwrap_or(0);
                stored_bytes = stored_bytes.saturating_add(size);
                recorded.push(RecordedPhoto {
                    id: photo.id.clone(),
                    storage_path: photo.storage_path.clone(),
                    created: true,
                });
                continue;
            }

            let row = sqlx::query(
                "SELECT id FROM photos WHERE upload_session_id = ? AND storage_path = ?",
            )
            .bind(&photo.upload_session_id)
            .bind(&photo.storage_path)
            .fetch_one(&mut *tx)
            .await?;

            recorded.push(RecordedPhoto {
                id: row.try_get("id")?,
                storage_path: photo.storage_path.clone(),
                created: false,
            });
        }

        let storage_used_bytes = if stored_bytes > 0 {
            Some(add_storage(&mut *tx, &session.event_id, stored_bytes).await?)
        } else {
            None
        };

        let uploaded_files = u32::try_from(photos.len()).unwrap_or(u32::MAX);
        let newly_completed = sqlx::query(
            "UPDATE upload_sessions SET status = ?, uploaded_files = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(SessionStatus::Completed.as_str())
        .bind(uploaded_files)
        .bind(chrono::Utc::now().timestamp())
        .bind(&session.id)
        .bind(SessionStatus::Active.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        tx.commit().await?;

        Ok(Reconciliation {
            recorded,
            stored_bytes,
            storage_used_bytes,
            newly_completed,
        })
    }

    pub async fn list_photos(&self, event_id: &str) -> SessionResult<Vec<PhotoRecord>> {
        let rows = sqlx::query("SELECT * FROM photos WHERE event_id = ? ORDER BY created_at, storage_path")
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(photo_from_row).collect()
    }

    /// Close database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn event_from_row(row: &SqliteRow) -> SessionResult<EventRecord> {
    let used: i64 = row.try_get("storage_used_bytes")?;
    Ok(EventRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        storage_limit_mb: row.try_get("storage_limit_mb")?,
        storage_used_bytes: used.max(0) as u64,
        created_at: row.try_get("created_at")?,
    })
}

fn guest_from_row(row: &SqliteRow) -> SessionResult<GuestRecord> {
    Ok(GuestRecord {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        name: row.try_get("name")?,
        guest_token: row.try_get("guest_token")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &SqliteRow) -> SessionResult<UploadSession> {
    let status: String = row.try_get("status")?;
    Ok(UploadSession {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        guest_id: row.try_get("guest_id")?,
        total_files: row.try_get("total_files")?,
        uploaded_files: row.try_get("uploaded_files")?,
        status: status.parse().map_err(SessionError::InvalidData)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn add_storage(conn: &mut SqliteConnection, event_id: &str, bytes: u64) -> SessionResult<u64> {
    let row = sqlx::query(
        "UPDATE events SET storage_used_bytes = storage_used_bytes + ? WHERE id = ? RETURNING storage_used_bytes",
    )
    .bind(i64::try_from(bytes).unwrap_or(i64::MAX))
    .bind(event_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| SessionError::NotFound(event_id.to_string()))?;

    let total: i64 = row.try_get("storage_used_bytes")?;
    Ok(total.max(0) as u64)
}

fn photo_from_row(row: &SqliteRow) -> SessionResult<PhotoRecord> {
    Ok(PhotoRecord {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        guest_id: row.try_get("guest_id")?,
        upload_session_id: row.try_get("upload_session_id")?,
        storage_path: row.try_get("storage_path")?,
        url: row.try_get("url")?,
        original_filename: row.try_get("original_filename")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
    })
}
