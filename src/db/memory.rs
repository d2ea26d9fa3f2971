//! In-memory database
//!
//! Thread-safe via `RwLock`, like the other shared catalogs in the crate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::models::{Camera, MotionEvent, Recording};
use super::{CameraStore, DatabaseError, MotionEventStore, RecordingStore};

#[derive(Default)]
struct Tables {
    next_id: i64,
    cameras: BTreeMap<i64, Camera>,
    recordings: BTreeMap<i64, Recording>,
    motion_events: BTreeMap<i64, MotionEvent>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Database backend holding every table in memory
#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored recordings
    pub fn recording_count(&self) -> usize {
        self.tables.read().recordings.len()
    }
}

impl CameraStore for MemoryDatabase {
    fn add_camera(&self, mut camera: Camera) -> Result<i64, DatabaseError> {
        let mut tables = self.tables.write();
        if tables.cameras.values().any(|c| c.name == camera.name) {
            return Err(DatabaseError::Backend(format!(
                "camera name already exists: {}",
                camera.name
            )));
        }
        let id = tables.allocate_id();
        camera.id = Some(id);
        tables.cameras.insert(id, camera);
        Ok(id)
    }

    fn all_cameras(&self) -> Result<Vec<Camera>, DatabaseError> {
        Ok(self.tables.read().cameras.values().cloned().collect())
    }

    fn camera_by_name(&self, name: &str) -> Result<Option<Camera>, DatabaseError> {
        Ok(self
            .tables
            .read()
            .cameras
            .values()
            .find(|camera| camera.name == name)
            .cloned())
    }

    fn camera_by_id(&self, id: i64) -> Result<Option<Camera>, DatabaseError> {
        Ok(self.tables.read().cameras.get(&id).cloned())
    }

    fn update_camera(&self, camera: &Camera) -> Result<(), DatabaseError> {
        let not_found = || DatabaseError::NotFound {
            kind: "camera",
            key: camera.name.clone(),
        };
        let id = camera.id.ok_or_else(not_found)?;
        let mut tables = self.tables.write();
        let row = tables.cameras.get_mut(&id).ok_or_else(not_found)?;
        *row = camera.clone();
        Ok(())
    }

    fn delete_camera(&self, id: i64) -> Result<(), DatabaseError> {
        self.tables
            .write()
            .cameras
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DatabaseError::NotFound {
                kind: "camera",
                key: id.to_string(),
            })
    }
}

impl RecordingStore for MemoryDatabase {
    fn insert_recording(&self, mut recording: Recording) -> Result<i64, DatabaseError> {
        let mut tables = self.tables.write();
        if !tables.cameras.contains_key(&recording.camera_id) {
            return Err(DatabaseError::NotFound {
                kind: "camera",
                key: recording.camera_id.to_string(),
            });
        }
        let id = tables.allocate_id();
        recording.id = Some(id);
        tables.recordings.insert(id, recording);
        Ok(id)
    }

    fn remove_recording(&self, id: i64) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write();
        if tables.recordings.remove(&id).is_none() {
            tracing::error!(recording = id, "Recording not found, nothing to remove");
            return Ok(());
        }
        tables.motion_events.retain(|_, event| event.recording_id != id);
        Ok(())
    }

    fn recordings_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Recording>, DatabaseError> {
        let mut recordings: Vec<Recording> = self
            .tables
            .read()
            .recordings
            .values()
            .filter(|recording| recording.start < cutoff)
            .cloned()
            .collect();
        recordings.sort_by_key(|recording| recording.start);
        Ok(recordings)
    }
}

impl MotionEventStore for MemoryDatabase {
    fn add_motion_event(&self, mut event: MotionEvent) -> Result<i64, DatabaseError> {
        let mut tables = self.tables.write();
        if !tables.recordings.contains_key(&event.recording_id) {
            return Err(DatabaseError::NotFound {
                kind: "recording",
                key: event.recording_id.to_string(),
            });
        }
        let id = tables.allocate_id();
        event.id = Some(id);
        tables.motion_events.insert(id, event);
        Ok(id)
    }

    fn motion_events(&self, recording_id: i64) -> Result<Vec<MotionEvent>, DatabaseError> {
        Ok(self
            .tables
            .read()
            .motion_events
            .values()
            .filter(|event| event.recording_id == recording_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::{add_recording, Segment};

    fn camera(name: &str) -> Camera {
        Camera {
            id: None,
            name: name.into(),
            stream_format: "rtsp".into(),
            host: "10.0.0.2".into(),
            port: 554,
            path: "/stream".into(),
            width: None,
            height: None,
            fps: None,
        }
    }

    #[test]
    fn test_camera_crud() {
        let db = MemoryDatabase::new();
        let id = db.add_camera(camera("front")).unwrap();

        let mut stored = db.camera_by_name("front").unwrap().unwrap();
        assert_eq!(stored.id, Some(id));

        stored.port = 8554;
        db.update_camera(&stored).unwrap();
        assert_eq!(db.camera_by_id(id).unwrap().unwrap().port, 8554);

        assert!(db.add_camera(camera("front")).is_err());
        db.delete_camera(id).unwrap();
        assert!(db.all_cameras().unwrap().is_empty());
        assert!(matches!(
            db.delete_camera(id),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_add_recording_with_segments() {
        let db = MemoryDatabase::new();
        db.add_camera(camera("front")).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let segments = [Segment {
            start: start + Duration::seconds(2),
            end: start + Duration::seconds(75),
        }];

        let id = add_recording(&db, "front", &segments, start, "/rec/front/1.mp4").unwrap();

        let events = db.motion_events(id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp_start, "00:00:02.0000");
        assert_eq!(events[0].timestamp_end, "00:01:15.0000");
    }

    #[test]
    fn test_add_recording_unknown_camera() {
        let db = MemoryDatabase::new();
        let result = add_recording(&db, "ghost", &[], Utc::now(), "/rec/x.mp4");
        assert!(matches!(
            result,
            Err(DatabaseError::NotFound { kind: "camera", .. })
        ));
    }

    #[test]
    fn test_remove_recording_cascades_and_is_idempotent() {
        let db = MemoryDatabase::new();
        db.add_camera(camera("front")).unwrap();
        let start = Utc::now();
        let segments = [Segment { start, end: start }];
        let id = add_recording(&db, "front", &segments, start, "/rec/1.mp4").unwrap();

        db.remove_recording(id).unwrap();
        assert!(db.motion_events(id).unwrap().is_empty());
        assert_eq!(db.recording_count(), 0);

        // Unknown ids are not an error
        db.remove_recording(id).unwrap();
    }

    #[test]
    fn test_recordings_older_than() {
        let db = MemoryDatabase::new();
        db.add_camera(camera("front")).unwrap();
        let now = Utc::now();
        for days in [1, 10, 5] {
            add_recording(&db, "front", &[], now - Duration::days(days), "/rec/x.mp4").unwrap();
        }

        let old = db.recordings_older_than(now - Duration::days(3)).unwrap();
        assert_eq!(old.len(), 2);
        assert!(old[0].start < old[1].start);
    }
}
