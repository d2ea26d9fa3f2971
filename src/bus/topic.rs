//! Topic naming helpers
//!
//! Topics are `/`-separated paths. With hierarchical delivery enabled, an
//! item published on `camera/front/frame` also reaches subscribers of
//! `camera/front` and `camera`.

/// Iterate a topic and its parent scopes, most specific first
pub fn scopes(topic: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(topic), |current| {
        current.rfind('/').map(|index| &current[..index])
    })
    .filter(|scope| !scope.is_empty())
}

/// Topic carrying decoded frames of a camera
pub fn camera_frame(camera: &str) -> String {
    format!("camera/{camera}/frame")
}

/// Topic carrying detection results of a camera
pub fn camera_detections(camera: &str) -> String {
    format!("camera/{camera}/detections")
}

/// Topic carrying status changes of a camera
pub fn camera_status(camera: &str) -> String {
    format!("camera/{camera}/status")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_most_specific_first() {
        let scopes: Vec<_> = scopes("camera/front/frame").collect();
        assert_eq!(scopes, vec!["camera/front/frame", "camera/front", "camera"]);
    }

    #[test]
    fn test_scopes_flat_topic() {
        let scopes: Vec<_> = scopes("status").collect();
        assert_eq!(scopes, vec!["status"]);
    }

    #[test]
    fn test_camera_topics() {
        assert_eq!(camera_frame("door"), "camera/door/frame");
        assert_eq!(camera_detections("door"), "camera/door/detections");
    }
}
