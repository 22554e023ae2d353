// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Feeding schedule storage using SQLite.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::schedule::{FeedTime, ScheduleEntry, ScheduleError};

/// Key-ordered record store for schedule entries.
pub trait ScheduleStore: Send + Sync {
    /// Store a new entry and return its id.
    fn insert(&self, entry: &ScheduleEntry) -> Result<i64, ScheduleError>;

    /// Change the time of a stored entry.
    fn update(&self, entry: &ScheduleEntry) -> Result<(), ScheduleError>;

    /// Remove a stored entry.
    fn delete(&self, entry: &ScheduleEntry) -> Result<(), ScheduleError>;

    /// All entries, ascending by time.
    fn list(&self) -> Result<Vec<ScheduleEntry>, ScheduleError>;
}

/// Schedule database manager.
#[derive(Clone)]
pub struct SqliteScheduleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteScheduleStore {
    /// Create or open the schedule database.
    pub fn new(data_dir: &Path) -> Result<Self, ScheduleError> {
        if let Err(e) = std::fs::create_dir_all(data_dir) {
            warn!("Failed to create data directory {:?}: {}", data_dir, e);
        }
        let db_path = data_dir.join("schedule.db");
        info!("Opening schedule database: {:?}", db_path);

        let conn = Connection::open(&db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schedule_times (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn require_id(entry: &ScheduleEntry) -> Result<i64, ScheduleError> {
        entry.id.ok_or(ScheduleError::MissingId)
    }
}

impl ScheduleStore for SqliteScheduleStore {
    fn insert(&self, entry: &ScheduleEntry) -> Result<i64, ScheduleError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO schedule_times (time) VALUES (?1)",
            params![entry.time.as_str()],
        )?;
        let id = conn.last_insert_rowid();
        info!("Added feeding time {} (id {})", entry.time, id);
        Ok(id)
    }

    fn update(&self, entry: &ScheduleEntry) -> Result<(), ScheduleError> {
        let id = Self::require_id(entry)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE schedule_times SET time = ?1 WHERE id = ?2",
            params![entry.time.as_str(), id],
        )?;
        if changed == 0 {
            return Err(ScheduleError::NotFound(id));
        }
        info!("Updated feeding time {} to {}", id, entry.time);
        Ok(())
    }

    fn delete(&self, entry: &ScheduleEntry) -> Result<(), ScheduleError> {
        let id = Self::require_id(entry)?;
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM schedule_times WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(ScheduleError::NotFound(id));
        }
        info!("Removed feeding time {}", id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, time FROM schedule_times ORDER BY time ASC, id ASC")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let entries = rows
            .into_iter()
            .filter_map(|(id, time)| match FeedTime::parse(&time) {
                Ok(time) => Some(ScheduleEntry::with_id(id, time)),
                Err(e) => {
                    warn!("Skipping stored entry {}: {}", id, e);
                    None
                }
            })
            .collect();

        Ok(entries)
    }
}
