use nalgebra::Point3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TrajectoryError {
    #[error("Trajectory contains no frames")]
    Empty,
    #[error("Frame {frame} has {found} atoms, expected {expected}")]
    InconsistentFrame {
        frame: usize,
        expected: usize,
        found: usize,
    },
}

/// An ordered sequence of frames, each holding one coordinate per atom.
///
/// Every frame carries the same number of atoms; atom `n` of one frame is atom `n` of every
/// other frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    frames: Vec<Vec<Point3<f64>>>,
    atom_count: usize,
}

impl Trajectory {
    pub fn new(frames: Vec<Vec<Point3<f64>>>) -> Result<Self, TrajectoryError> {
        let atom_count = frames.first().ok_or(TrajectoryError::Empty)?.len();
        if let Some((frame, found)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.len() != atom_count)
            .map(|(i, f)| (i, f.len()))
        {
            return Err(TrajectoryError::InconsistentFrame {
                frame,
                expected: atom_count,
                found,
            });
        }
        Ok(Self { frames, atom_count })
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn atom_count(&self) -> usize {
        self.atom_count
    }

    pub fn frames(&self) -> &[Vec<Point3<f64>>] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&[Point3<f64>]> {
        self.frames.get(index).map(Vec::as_slice)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize, offset: f64) -> Vec<Point3<f64>> {
        (0..n)
            .map(|i| Point3::new(i as f64 + offset, 0.0, 0.0))
            .collect()
    }

    #[test]
    fn new_rejects_empty_trajectory() {
        assert_eq!(Trajectory::new(vec![]), Err(TrajectoryError::Empty));
    }

    #[test]
    fn new_rejects_frames_with_different_atom_counts() {
        let result = Trajectory::new(vec![frame(3, 0.0), frame(2, 0.0)]);
        assert_eq!(
            result,
            Err(TrajectoryError::InconsistentFrame {
                frame: 1,
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn accessors_report_shape_and_frames() {
        let traj = Trajectory::new(vec![frame(4, 0.0), frame(4, 1.0), frame(4, 2.0)]).unwrap();
        assert_eq!(traj.frame_count(), 3);
        assert_eq!(traj.atom_count(), 4);
        assert_eq!(traj.frame(1).unwrap()[0].x, 1.0);
        assert!(traj.frame(3).is_none());
    }
}
