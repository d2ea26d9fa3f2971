//! Persistence collaborator
//!
//! CRUD interfaces for cameras, recordings and motion events. The
//! supervision core only needs [`RecordingStore`]; the other stores are used
//! by camera setup and by [`add_recording`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::MemoryDatabase;
pub use models::{format_offset, Camera, MotionEvent, Recording, Segment};
pub use sqlite::SqliteDatabase;

/// Error type for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// A referenced record does not exist
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Record type
        kind: &'static str,
        /// Lookup key
        key: String,
    },
    /// The storage backend failed
    #[error("Database backend error: {0}")]
    Backend(String),
    /// SQLite reported an error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The database location could not be prepared
    #[error("Database I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database section of the configuration
///
/// ```json
/// { "database": { "type": "sqlite", "path": "/config/nvr.db" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// Nothing survives a restart
    Memory,
    /// SQLite file
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("/config/nvr.db")
}

/// Every table, as one trait object
pub trait Database: CameraStore + RecordingStore + MotionEventStore {
    /// View as the recording table, for the janitor
    fn recordings(self: Arc<Self>) -> Arc<dyn RecordingStore>;
}

impl<D> Database for D
where
    D: CameraStore + RecordingStore + MotionEventStore + 'static,
{
    fn recordings(self: Arc<Self>) -> Arc<dyn RecordingStore> {
        self
    }
}

/// Open the backend selected by `config`
pub fn open(config: &DatabaseConfig) -> Result<Arc<dyn Database>, DatabaseError> {
    match config {
        DatabaseConfig::Memory => {
            tracing::warn!("Using in-memory database, recordings are not persisted");
            Ok(Arc::new(MemoryDatabase::new()))
        }
        DatabaseConfig::Sqlite { path } => Ok(Arc::new(SqliteDatabase::open(path.clone())?)),
    }
}

/// Camera table
pub trait CameraStore: Send + Sync {
    /// Insert a camera, returning its id
    fn add_camera(&self, camera: Camera) -> Result<i64, DatabaseError>;

    /// All cameras, ordered by id
    fn all_cameras(&self) -> Result<Vec<Camera>, DatabaseError>;

    /// Look up a camera by name
    fn camera_by_name(&self, name: &str) -> Result<Option<Camera>, DatabaseError>;

    /// Look up a camera by id
    fn camera_by_id(&self, id: i64) -> Result<Option<Camera>, DatabaseError>;

    /// Replace an existing camera
    fn update_camera(&self, camera: &Camera) -> Result<(), DatabaseError>;

    /// Delete a camera
    fn delete_camera(&self, id: i64) -> Result<(), DatabaseError>;
}

/// Recording table
pub trait RecordingStore: Send + Sync {
    /// Insert a recording, returning its id
    fn insert_recording(&self, recording: Recording) -> Result<i64, DatabaseError>;

    /// Delete a recording and its motion events
    ///
    /// Deleting an unknown id is logged and succeeds.
    fn remove_recording(&self, id: i64) -> Result<(), DatabaseError>;

    /// Recordings that started before `cutoff`, oldest first
    fn recordings_older_than(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<Recording>, DatabaseError>;
}

/// Motion event table
pub trait MotionEventStore: Send + Sync {
    /// Insert a motion event, returning its id
    fn add_motion_event(&self, event: MotionEvent) -> Result<i64, DatabaseError>;

    /// Motion events of a recording, ordered by id
    fn motion_events(&self, recording_id: i64) -> Result<Vec<MotionEvent>, DatabaseError>;
}

/// Store a recording of `camera_name` and one motion event per segment
///
/// Fails with [`DatabaseError::NotFound`] if the camera is unknown.
pub fn add_recording<D>(
    db: &D,
    camera_name: &str,
    segments: &[Segment],
    event_start: DateTime<Utc>,
    path: impl Into<PathBuf>,
) -> Result<i64, DatabaseError>
where
    D: CameraStore + RecordingStore + MotionEventStore + ?Sized,
{
    let camera_id = db
        .camera_by_name(camera_name)?
        .and_then(|camera| camera.id)
        .ok_or_else(|| DatabaseError::NotFound {
            kind: "camera",
            key: camera_name.to_owned(),
        })?;

    let recording_id = db.insert_recording(Recording {
        id: None,
        camera_id,
        start: event_start,
        path: path.into(),
    })?;

    for segment in segments {
        db.add_motion_event(MotionEvent {
            id: None,
            recording_id,
            timestamp_start: format_offset(segment.start - event_start),
            timestamp_end: format_offset(segment.end - event_start),
        })?;
    }

    tracing::debug!(
        camera = %camera_name,
        recording = recording_id,
        segments = segments.len(),
        "Recording stored"
    );

    Ok(recording_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_variants() {
        let memory: DatabaseConfig = serde_json::from_str(r#"{ "type": "memory" }"#).unwrap();
        assert_eq!(memory, DatabaseConfig::Memory);

        let sqlite: DatabaseConfig = serde_json::from_str(r#"{ "type": "sqlite" }"#).unwrap();
        assert_eq!(sqlite, DatabaseConfig::default());

        assert!(serde_json::from_str::<DatabaseConfig>(r#"{ "type": "postgres" }"#).is_err());
    }

    #[test]
    fn test_open_selected_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::Sqlite {
            path: dir.path().join("nvr.db"),
        };

        let db = open(&config).unwrap();
        let camera_id = db
            .add_camera(Camera {
                id: None,
                name: "porch".into(),
                stream_format: "rtsp".into(),
                host: "10.0.0.1".into(),
                port: 554,
                path: "/".into(),
                width: None,
                height: None,
                fps: None,
            })
            .unwrap();
        db.insert_recording(Recording {
            id: None,
            camera_id,
            start: Utc::now() - chrono::Duration::days(1),
            path: "/rec/a.mp4".into(),
        })
        .unwrap();
        assert!(dir.path().join("nvr.db").exists());

        let recordings = db.recordings();
        assert_eq!(recordings.recordings_older_than(Utc::now()).unwrap().len(), 1);

        assert!(open(&DatabaseConfig::Memory).unwrap().all_cameras().unwrap().is_empty());
    }
}
