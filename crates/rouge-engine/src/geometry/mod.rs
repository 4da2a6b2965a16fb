//! Geometry Mapper
//!
//! Converts raw detector output (normalized landmark coordinates) into the
//! clip-space vertex data the renderer consumes, plus the aspect-correction
//! uniform math for the background pass.

pub mod topology;

pub use topology::{lip_topology, RegionTopology};

use crate::detector::DetectionResult;

/// Per-frame vertex data for the effect overlay.
///
/// Capacity is fixed to the topology's worst-case triangle count at
/// construction; frames rewrite the contents but never reallocate.
#[derive(Debug, Clone)]
pub struct GeometryBuffer {
    vertices: Vec<[f32; 2]>,
    vertex_count: usize,
}

impl GeometryBuffer {
    pub fn for_topology(topology: &RegionTopology) -> Self {
        Self {
            vertices: vec![[0.0, 0.0]; topology.vertex_capacity()],
            vertex_count: 0,
        }
    }

    /// The vertices written for the current frame.
    pub fn vertices(&self) -> &[[f32; 2]] {
        &self.vertices[..self.vertex_count]
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn capacity(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

/// What [`GeometryMapper::map`] did with the buffer this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    /// A face was present; the buffer holds fresh geometry.
    Updated,
    /// No face; the previous geometry was held unchanged.
    HeldLastGood,
    /// No face and no previous geometry; the buffer is empty.
    Empty,
}

/// Maps landmark sets onto a region topology.
///
/// Stateless across frames: the hold-last-good policy lives entirely in the
/// buffer contents the caller passes back in.
#[derive(Debug, Clone)]
pub struct GeometryMapper {
    topology: RegionTopology,
    mirror: bool,
}

impl GeometryMapper {
    pub fn new(topology: RegionTopology, mirror: bool) -> Self {
        Self { topology, mirror }
    }

    pub fn topology(&self) -> &RegionTopology {
        &self.topology
    }

    /// Write clip-space vertices for the detected face into `buffer`.
    ///
    /// Zero-face detections leave the previous contents untouched. A
    /// landmark set smaller than the topology expects is treated the same
    /// way (the topology was validated against the full set size, so a
    /// short set means the detection is unusable, not that indexing should
    /// be attempted).
    pub fn map(&self, result: &DetectionResult, buffer: &mut GeometryBuffer) -> MapOutcome {
        let face = match &result.face {
            Some(face) if face.points.len() >= self.topology.landmark_count() => face,
            _ => {
                return if buffer.is_empty() {
                    MapOutcome::Empty
                } else {
                    MapOutcome::HeldLastGood
                };
            }
        };

        let mut written = 0;
        for triangle in self.topology.triangles() {
            for &index in triangle {
                let point = face.points[index];
                buffer.vertices[written] = self.to_clip(point[0], point[1]);
                written += 1;
            }
        }
        buffer.vertex_count = written;
        MapOutcome::Updated
    }

    /// Normalized landmark coordinates (origin top-left, y down) to clip
    /// space (origin center, y up), with optional horizontal mirroring to
    /// match a mirror-like preview.
    fn to_clip(&self, x: f32, y: f32) -> [f32; 2] {
        let x = if self.mirror { 1.0 - x } else { x };
        [x * 2.0 - 1.0, 1.0 - y * 2.0]
    }
}

/// Contain-fit scale factors for drawing a source of aspect `src_aspect`
/// into a destination of aspect `dst_aspect`.
///
/// The full source stays visible: the quad is shrunk along one axis,
/// producing pillarbox bars when the source is narrower than the
/// destination and letterbox bars when it is wider. Never a cover crop.
pub fn contain_fit(src_aspect: f32, dst_aspect: f32) -> [f32; 2] {
    if src_aspect <= 0.0 || dst_aspect <= 0.0 {
        return [1.0, 1.0];
    }
    if src_aspect > dst_aspect {
        // Source wider than destination: fit width, shrink height.
        [1.0, dst_aspect / src_aspect]
    } else {
        // Source narrower: fit height, shrink width.
        [src_aspect / dst_aspect, 1.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectionResult, FaceLandmarks, FACE_LANDMARK_COUNT};
    use proptest::prelude::*;

    fn face_with_uniform_points(value: f32) -> DetectionResult {
        DetectionResult {
            face: Some(FaceLandmarks {
                points: vec![[value, value, 0.0]; FACE_LANDMARK_COUNT],
                blendshapes: None,
                mask: None,
            }),
            timestamp_ms: 0,
        }
    }

    fn no_face() -> DetectionResult {
        DetectionResult {
            face: None,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_map_fills_buffer_to_topology_capacity() {
        let mapper = GeometryMapper::new(lip_topology(), false);
        let mut buffer = GeometryBuffer::for_topology(mapper.topology());
        let outcome = mapper.map(&face_with_uniform_points(0.5), &mut buffer);
        assert_eq!(outcome, MapOutcome::Updated);
        assert_eq!(buffer.vertex_count(), buffer.capacity());
        // (0.5, 0.5) maps to clip-space origin.
        for vertex in buffer.vertices() {
            assert!(vertex[0].abs() < 1e-6);
            assert!(vertex[1].abs() < 1e-6);
        }
    }

    #[test]
    fn test_mirroring_flips_x_only() {
        let mapper = GeometryMapper::new(lip_topology(), true);
        let mut buffer = GeometryBuffer::for_topology(mapper.topology());
        mapper.map(&face_with_uniform_points(0.25), &mut buffer);
        for vertex in buffer.vertices() {
            // x = 0.25 mirrored to 0.75, clip 0.5; y = 0.25, clip 0.5.
            assert!((vertex[0] - 0.5).abs() < 1e-6);
            assert!((vertex[1] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_faces_holds_previous_geometry() {
        let mapper = GeometryMapper::new(lip_topology(), false);
        let mut buffer = GeometryBuffer::for_topology(mapper.topology());
        mapper.map(&face_with_uniform_points(0.3), &mut buffer);
        let snapshot = buffer.vertices().to_vec();

        for _ in 0..5 {
            let outcome = mapper.map(&no_face(), &mut buffer);
            assert_eq!(outcome, MapOutcome::HeldLastGood);
        }
        assert_eq!(buffer.vertices(), snapshot.as_slice());
    }

    #[test]
    fn test_zero_faces_with_no_history_is_empty() {
        let mapper = GeometryMapper::new(lip_topology(), false);
        let mut buffer = GeometryBuffer::for_topology(mapper.topology());
        let outcome = mapper.map(&no_face(), &mut buffer);
        assert_eq!(outcome, MapOutcome::Empty);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_short_landmark_set_is_held_not_indexed() {
        let mapper = GeometryMapper::new(lip_topology(), false);
        let mut buffer = GeometryBuffer::for_topology(mapper.topology());
        let short = DetectionResult {
            face: Some(FaceLandmarks {
                points: vec![[0.5, 0.5, 0.0]; 100],
                blendshapes: None,
                mask: None,
            }),
            timestamp_ms: 0,
        };
        assert_eq!(mapper.map(&short, &mut buffer), MapOutcome::Empty);
    }

    #[test]
    fn test_contain_fit_pillarboxes_4_3_into_16_9() {
        let scale = contain_fit(4.0 / 3.0, 16.0 / 9.0);
        assert!((scale[0] - 0.75).abs() < 1e-6);
        assert!((scale[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_contain_fit_letterboxes_16_9_into_4_3() {
        let scale = contain_fit(16.0 / 9.0, 4.0 / 3.0);
        assert!((scale[0] - 1.0).abs() < 1e-6);
        assert!((scale[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_contain_fit_matching_aspect_is_identity() {
        let scale = contain_fit(16.0 / 9.0, 16.0 / 9.0);
        assert_eq!(scale, [1.0, 1.0]);
    }

    proptest! {
        /// Contain fit is deterministic, bounded by the unit quad, and
        /// always keeps at least one axis unscaled.
        #[test]
        fn prop_contain_fit_bounds(src in 0.1f32..10.0, dst in 0.1f32..10.0) {
            let a = contain_fit(src, dst);
            let b = contain_fit(src, dst);
            prop_assert_eq!(a, b);
            prop_assert!(a[0] > 0.0 && a[0] <= 1.0);
            prop_assert!(a[1] > 0.0 && a[1] <= 1.0);
            prop_assert!((a[0] - 1.0).abs() < 1e-6 || (a[1] - 1.0).abs() < 1e-6);
        }
    }
}
