//! SQLite database
//!
//! One connection behind a mutex. The schema is brought up to date on open:
//! every entry of [`UPDATES`] that is not yet listed in the `updates` table
//! is applied inside its own transaction.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use super::models::{Camera, MotionEvent, Recording};
use super::{CameraStore, DatabaseError, MotionEventStore, RecordingStore};

/// Schema updates in application order, keyed by a unique name
const UPDATES: &[(&str, &str)] = &[
    (
        "0001_init",
        "CREATE TABLE camera (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            stream_format TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            path TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            fps INTEGER
        );
        CREATE TABLE recording (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            camera_id INTEGER NOT NULL REFERENCES camera(id) ON DELETE CASCADE,
            time TEXT NOT NULL,
            filename TEXT NOT NULL
        );
        CREATE TABLE motion_event (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id INTEGER NOT NULL REFERENCES recording(id) ON DELETE CASCADE,
            timestamp_start TEXT NOT NULL,
            timestamp_end TEXT NOT NULL
        );",
    ),
    (
        "0002_recording_time_index",
        "CREATE INDEX recording_time ON recording(time);",
    ),
];

const CAMERA_COLUMNS: &str = "id, name, stream_format, host, port, path, width, height, fps";

/// Database backend storing every table in one SQLite file
pub struct SqliteDatabase {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Open (or create) the database at `path` and apply pending updates
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut connection = Connection::open_with_flags(&path, flags)?;
        connection.pragma_update(None, "foreign_keys", true)?;

        let applied = apply_updates(&mut connection)?;
        tracing::info!(path = %path.display(), applied, "Database up to date");

        Ok(Self {
            path,
            connection: Mutex::new(connection),
        })
    }

    /// Database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the schema updates applied so far, in order
    pub fn applied_updates(&self) -> Result<Vec<String>, DatabaseError> {
        let connection = self.connection.lock();
        let mut statement = connection.prepare_cached("SELECT name FROM updates ORDER BY name")?;
        let names = statement
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Number of stored recordings
    pub fn recording_count(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .connection
            .lock()
            .query_row("SELECT COUNT(*) FROM recording", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn apply_updates(connection: &mut Connection) -> Result<usize, DatabaseError> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS updates (name TEXT PRIMARY KEY NOT NULL, applied TEXT NOT NULL)",
        [],
    )?;

    let mut applied = 0;
    for (name, script) in UPDATES {
        let done: bool = connection.query_row(
            "SELECT COUNT(*) > 0 FROM updates WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        if done {
            continue;
        }

        tracing::info!(update = name, "Applying database update");
        let tx = connection.transaction()?;
        tx.execute_batch(script)?;
        tx.execute(
            "INSERT INTO updates (name, applied) VALUES (?1, ?2)",
            params![name, timestamp(Utc::now())],
        )?;
        tx.commit()?;
        applied += 1;
    }

    Ok(applied)
}

/// Fixed-width UTC timestamp, so text order is time order
fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn camera_from_row(row: &Row<'_>) -> rusqlite::Result<Camera> {
    Ok(Camera {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        stream_format: row.get(2)?,
        host: row.get(3)?,
        port: row.get(4)?,
        path: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        fps: row.get(8)?,
    })
}

fn recording_from_row(row: &Row<'_>) -> rusqlite::Result<Recording> {
    let filename: String = row.get(3)?;
    Ok(Recording {
        id: Some(row.get(0)?),
        camera_id: row.get(1)?,
        start: parse_timestamp(row, 2)?,
        path: PathBuf::from(filename),
    })
}

fn exists(connection: &Connection, table: &str, id: i64) -> rusqlite::Result<bool> {
    connection.query_row(
        &format!("SELECT COUNT(*) > 0 FROM {table} WHERE id = ?1"),
        [id],
        |row| row.get(0),
    )
}

impl CameraStore for SqliteDatabase {
    fn add_camera(&self, camera: Camera) -> Result<i64, DatabaseError> {
        let connection = self.connection.lock();
        connection.execute(
            "INSERT INTO camera (name, stream_format, host, port, path, width, height, fps)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                camera.name,
                camera.stream_format,
                camera.host,
                camera.port,
                camera.path,
                camera.width,
                camera.height,
                camera.fps,
            ],
        )?;
        Ok(connection.last_insert_rowid())
    }

    fn all_cameras(&self) -> Result<Vec<Camera>, DatabaseError> {
        let connection = self.connection.lock();
        let mut statement =
            connection.prepare_cached(&format!("SELECT {CAMERA_COLUMNS} FROM camera ORDER BY id"))?;
        let cameras = statement
            .query_map([], camera_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cameras)
    }

    fn camera_by_name(&self, name: &str) -> Result<Option<Camera>, DatabaseError> {
        let connection = self.connection.lock();
        let camera = connection
            .query_row(
                &format!("SELECT {CAMERA_COLUMNS} FROM camera WHERE name = ?1"),
                [name],
                camera_from_row,
            )
            .optional()?;
        Ok(camera)
    }

    fn camera_by_id(&self, id: i64) -> Result<Option<Camera>, DatabaseError> {
        let connection = self.connection.lock();
        let camera = connection
            .query_row(
                &format!("SELECT {CAMERA_COLUMNS} FROM camera WHERE id = ?1"),
                [id],
                camera_from_row,
            )
            .optional()?;
        Ok(camera)
    }

    fn update_camera(&self, camera: &Camera) -> Result<(), DatabaseError> {
        let not_found = || DatabaseError::NotFound {
            kind: "camera",
            key: camera.name.clone(),
        };
        let id = camera.id.ok_or_else(not_found)?;

        let updated = self.connection.lock().execute(
            "UPDATE camera SET name = ?1, stream_format = ?2, host = ?3, port = ?4, path = ?5,
                 width = ?6, height = ?7, fps = ?8
             WHERE id = ?9",
            params![
                camera.name,
                camera.stream_format,
                camera.host,
                camera.port,
                camera.path,
                camera.width,
                camera.height,
                camera.fps,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(not_found());
        }
        Ok(())
    }

    fn delete_camera(&self, id: i64) -> Result<(), DatabaseError> {
        let deleted = self
            .connection
            .lock()
            .execute("DELETE FROM camera WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(DatabaseError::NotFound {
                kind: "camera",
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

impl RecordingStore for SqliteDatabase {
    fn insert_recording(&self, recording: Recording) -> Result<i64, DatabaseError> {
        let connection = self.connection.lock();
        if !exists(&connection, "camera", recording.camera_id)? {
            return Err(DatabaseError::NotFound {
                kind: "camera",
                key: recording.camera_id.to_string(),
            });
        }

        connection.execute(
            "INSERT INTO recording (camera_id, time, filename) VALUES (?1, ?2, ?3)",
            params![
                recording.camera_id,
                timestamp(recording.start),
                recording.path.to_string_lossy().into_owned(),
            ],
        )?;
        Ok(connection.last_insert_rowid())
    }

    fn remove_recording(&self, id: i64) -> Result<(), DatabaseError> {
        let mut connection = self.connection.lock();
        let tx = connection.transaction()?;
        tx.execute("DELETE FROM motion_event WHERE recording_id = ?1", [id])?;
        let deleted = tx.execute("DELETE FROM recording WHERE id = ?1", [id])?;
        tx.commit()?;

        if deleted == 0 {
            tracing::error!(recording = id, "Recording not found, nothing to remove");
        }
        Ok(())
    }

    fn recordings_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Recording>, DatabaseError> {
        let connection = self.connection.lock();
        let mut statement = connection.prepare_cached(
            "SELECT id, camera_id, time, filename FROM recording WHERE time < ?1 ORDER BY time",
        )?;
        let recordings = statement
            .query_map([timestamp(cutoff)], recording_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recordings)
    }
}

impl MotionEventStore for SqliteDatabase {
    fn add_motion_event(&self, event: MotionEvent) -> Result<i64, DatabaseError> {
        let connection = self.connection.lock();
        if !exists(&connection, "recording", event.recording_id)? {
            return Err(DatabaseError::NotFound {
                kind: "recording",
                key: event.recording_id.to_string(),
            });
        }

        connection.execute(
            "INSERT INTO motion_event (recording_id, timestamp_start, timestamp_end)
             VALUES (?1, ?2, ?3)",
            params![event.recording_id, event.timestamp_start, event.timestamp_end],
        )?;
        Ok(connection.last_insert_rowid())
    }

    fn motion_events(&self, recording_id: i64) -> Result<Vec<MotionEvent>, DatabaseError> {
        let connection = self.connection.lock();
        let mut statement = connection.prepare_cached(
            "SELECT id, recording_id, timestamp_start, timestamp_end
             FROM motion_event WHERE recording_id = ?1 ORDER BY id",
        )?;
        let events = statement
            .query_map([recording_id], |row| {
                Ok(MotionEvent {
                    id: Some(row.get(0)?),
                    recording_id: row.get(1)?,
                    timestamp_start: row.get(2)?,
                    timestamp_end: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}
