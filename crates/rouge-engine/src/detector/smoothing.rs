//! Temporal landmark smoothing.
//!
//! Raw per-frame landmarks jitter by a pixel or two even on a still face,
//! which makes the painted lip edge shimmer. An exponential moving average
//! over the point set damps the jitter at the cost of a small amount of
//! lag. Reset on any frame without a face so a re-appearing face snaps to
//! its new position instead of gliding from the old one.

use super::FaceLandmarks;
use nalgebra::Vector3;

/// Exponential moving average over a landmark set.
#[derive(Debug, Clone)]
pub struct LandmarkSmoother {
    /// Blend factor in (0, 1]: 1.0 disables smoothing.
    alpha: f32,
    state: Option<Vec<Vector3<f32>>>,
}

impl LandmarkSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            state: None,
        }
    }

    /// Smooth the landmark points in place.
    pub fn apply(&mut self, face: &mut FaceLandmarks) {
        match &mut self.state {
            Some(state) if state.len() == face.points.len() => {
                for (smoothed, point) in state.iter_mut().zip(face.points.iter_mut()) {
                    let raw = Vector3::new(point[0], point[1], point[2]);
                    *smoothed = smoothed.lerp(&raw, self.alpha);
                    *point = [smoothed.x, smoothed.y, smoothed.z];
                }
            }
            _ => {
                self.state = Some(
                    face.points
                        .iter()
                        .map(|p| Vector3::new(p[0], p[1], p[2]))
                        .collect(),
                );
            }
        }
    }

    /// Forget the running average (call when no face was detected).
    pub fn reset(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(value: f32) -> FaceLandmarks {
        FaceLandmarks {
            points: vec![[value, value, 0.0]; 4],
            blendshapes: None,
            mask: None,
        }
    }

    #[test]
    fn test_first_frame_passes_through() {
        let mut smoother = LandmarkSmoother::new(0.5);
        let mut face = face_at(0.4);
        smoother.apply(&mut face);
        assert!((face.points[0][0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_second_frame_is_blended() {
        let mut smoother = LandmarkSmoother::new(0.5);
        let mut first = face_at(0.0);
        smoother.apply(&mut first);
        let mut second = face_at(1.0);
        smoother.apply(&mut second);
        assert!((second.points[0][0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_reset_snaps_to_new_position() {
        let mut smoother = LandmarkSmoother::new(0.1);
        let mut first = face_at(0.0);
        smoother.apply(&mut first);
        smoother.reset();
        let mut second = face_at(1.0);
        smoother.apply(&mut second);
        assert!((second.points[0][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_alpha_one_disables_smoothing() {
        let mut smoother = LandmarkSmoother::new(1.0);
        let mut first = face_at(0.0);
        smoother.apply(&mut first);
        let mut second = face_at(1.0);
        smoother.apply(&mut second);
        assert!((second.points[0][0] - 1.0).abs() < 1e-6);
    }
}
