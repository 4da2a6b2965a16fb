//! Region topologies over the face-mesh landmark set.
//!
//! A topology names which landmark indices form which triangles for a
//! target region. Index bounds are validated when the topology is built,
//! never per frame.

use crate::detector::FACE_LANDMARK_COUNT;
use crate::error::TopologyError;

/// Outer lip contour, ordered around the mouth.
pub const LIP_OUTER_RING: [usize; 20] = [
    61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291, 409, 270, 269, 267, 0, 37, 39, 40, 185,
];

/// Inner lip contour, ordered to pair with [`LIP_OUTER_RING`].
pub const LIP_INNER_RING: [usize; 20] = [
    78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308, 415, 310, 311, 312, 13, 82, 81, 80, 191,
];

/// A validated triangle list over a fixed-size landmark set.
#[derive(Debug, Clone)]
pub struct RegionTopology {
    triangles: Vec<[usize; 3]>,
    landmark_count: usize,
}

impl RegionTopology {
    /// Build from an explicit triangle list, rejecting any index outside
    /// the landmark set.
    pub fn from_triangles(
        triangles: Vec<[usize; 3]>,
        landmark_count: usize,
    ) -> Result<Self, TopologyError> {
        if triangles.is_empty() {
            return Err(TopologyError::Empty);
        }
        for triangle in &triangles {
            for &index in triangle {
                if index >= landmark_count {
                    return Err(TopologyError::IndexOutOfRange {
                        index,
                        landmark_count,
                    });
                }
            }
        }
        Ok(Self {
            triangles,
            landmark_count,
        })
    }

    /// Triangulate the band between two equal-length closed rings, e.g.
    /// the lip region between outer and inner contours. Produces two
    /// triangles per ring segment.
    pub fn ring_band(
        outer: &[usize],
        inner: &[usize],
        landmark_count: usize,
    ) -> Result<Self, TopologyError> {
        debug_assert_eq!(outer.len(), inner.len());
        let n = outer.len();
        let mut triangles = Vec::with_capacity(2 * n);
        for i in 0..n {
            let j = (i + 1) % n;
            triangles.push([outer[i], outer[j], inner[i]]);
            triangles.push([inner[i], outer[j], inner[j]]);
        }
        Self::from_triangles(triangles, landmark_count)
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Worst-case vertex count: every triangle fully expanded.
    pub fn vertex_capacity(&self) -> usize {
        self.triangles.len() * 3
    }

    pub fn landmark_count(&self) -> usize {
        self.landmark_count
    }
}

/// The canonical lip band for the lipstick effect.
pub fn lip_topology() -> RegionTopology {
    RegionTopology::ring_band(&LIP_OUTER_RING, &LIP_INNER_RING, FACE_LANDMARK_COUNT)
        .expect("canonical lip rings index the face-mesh landmark set")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lip_topology_dimensions() {
        let topology = lip_topology();
        // 20 ring segments, two triangles each.
        assert_eq!(topology.triangle_count(), 40);
        assert_eq!(topology.vertex_capacity(), 120);
        assert_eq!(topology.landmark_count(), FACE_LANDMARK_COUNT);
    }

    #[test]
    fn test_out_of_range_index_rejected_at_build() {
        let result = RegionTopology::from_triangles(vec![[0, 1, 478]], FACE_LANDMARK_COUNT);
        assert_eq!(
            result.unwrap_err(),
            TopologyError::IndexOutOfRange {
                index: 478,
                landmark_count: FACE_LANDMARK_COUNT,
            }
        );
    }

    #[test]
    fn test_empty_topology_rejected() {
        let result = RegionTopology::from_triangles(vec![], FACE_LANDMARK_COUNT);
        assert_eq!(result.unwrap_err(), TopologyError::Empty);
    }

    #[test]
    fn test_lip_rings_are_disjoint() {
        for index in LIP_OUTER_RING {
            assert!(!LIP_INNER_RING.contains(&index));
        }
    }
}
