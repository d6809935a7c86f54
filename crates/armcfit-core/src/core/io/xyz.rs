use crate::core::io::traits::TrajectoryFile;
use crate::core::models::trajectory::{Trajectory, TrajectoryError};
use nalgebra::Point3;
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XyzMetadata {
    /// Element symbols of the first frame.
    pub symbols: Vec<String>,
    /// Comment line of every frame.
    pub comments: Vec<String>,
}

#[derive(Debug, Error)]
pub enum XyzError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Invalid trajectory: {0}")]
    Trajectory(#[from] TrajectoryError),
}

pub struct XyzFile;

impl TrajectoryFile for XyzFile {
    type Metadata = XyzMetadata;
    type Error = XyzError;

    fn read_from(reader: &mut impl BufRead) -> Result<(Trajectory, Self::Metadata), Self::Error> {
        let mut lines = reader.lines().enumerate();
        let mut frames = Vec::new();
        let mut metadata = XyzMetadata::default();

        while let Some((idx, line)) = lines.next() {
            let line = line?;
            let header = line.trim();
            if header.is_empty() {
                continue;
            }
            let atom_count: usize = header.parse().map_err(|_| XyzError::Parse {
                line: idx + 1,
                message: format!("expected atom count, found '{header}'"),
            })?;

            let (_, comment) = lines.next().ok_or_else(|| XyzError::Parse {
                line: idx + 2,
                message: "missing comment line".to_string(),
            })?;
            metadata.comments.push(comment?.trim_end().to_string());

            let mut frame = Vec::with_capacity(atom_count);
            for n in 0..atom_count {
                let (line_idx, atom_line) = lines.next().ok_or_else(|| XyzError::Parse {
                    line: idx + 3 + n,
                    message: format!("frame ends after {n} of {atom_count} atoms"),
                })?;
                let atom_line = atom_line?;
                let (symbol, position) = parse_atom_line(&atom_line, line_idx + 1)?;
                if frames.is_empty() {
                    metadata.symbols.push(symbol.to_string());
                }
                frame.push(position);
            }
            frames.push(frame);
        }

        Ok((Trajectory::new(frames)?, metadata))
    }

    fn write_to(
        trajectory: &Trajectory,
        metadata: &Self::Metadata,
        writer: &mut impl Write,
    ) -> Result<(), Self::Error> {
        for (f, frame) in trajectory.frames().iter().enumerate() {
            writeln!(writer, "{}", frame.len())?;
            writeln!(
                writer,
                "{}",
                metadata.comments.get(f).map(String::as_str).unwrap_or("")
            )?;
            for (i, p) in frame.iter().enumerate() {
                let symbol = metadata.symbols.get(i).map(String::as_str).unwrap_or("X");
                writeln!(writer, "{symbol} {} {} {}", p.x, p.y, p.z)?;
            }
        }
        Ok(())
    }
}

fn parse_atom_line(line: &str, line_no: usize) -> Result<(&str, Point3<f64>), XyzError> {
    let mut fields = line.split_whitespace();
    let symbol = fields.next().ok_or_else(|| XyzError::Parse {
        line: line_no,
        message: "empty atom line".to_string(),
    })?;
    let mut coord = [0.0; 3];
    for c in coord.iter_mut() {
        let raw = fields.next().ok_or_else(|| XyzError::Parse {
            line: line_no,
            message: "atom line needs a symbol and three coordinates".to_string(),
        })?;
        *c = raw.parse().map_err(|_| XyzError::Parse {
            line: line_no,
            message: format!("invalid coordinate '{raw}'"),
        })?;
    }
    Ok((symbol, Point3::new(coord[0], coord[1], coord[2])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    const TWO_FRAMES: &str = "\
3
frame 0
Cd 0.0 0.0 0.0
O  1.0 0.0 0.0
C  0.0 1.5 -0.5
3
frame 1
Cd 0.1 0.0 0.0
O  1.1 0.0 0.0
C  0.1 1.5 -0.5
";

    #[test]
    fn read_from_parses_all_frames_and_symbols() {
        let (traj, meta) = XyzFile::read_from(&mut Cursor::new(TWO_FRAMES)).unwrap();
        assert_eq!(traj.frame_count(), 2);
        assert_eq!(traj.atom_count(), 3);
        assert_eq!(traj.frame(1).unwrap()[2], Point3::new(0.1, 1.5, -0.5));
        assert_eq!(meta.symbols, vec!["Cd", "O", "C"]);
        assert_eq!(meta.comments, vec!["frame 0", "frame 1"]);
    }

    #[test]
    fn read_from_reports_truncated_frame() {
        let input = "2\ncomment\nCd 0 0 0\n";
        let err = XyzFile::read_from(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, XyzError::Parse { line: 4, .. }), "{err:?}");
    }

    #[test]
    fn read_from_reports_bad_coordinate() {
        let input = "1\ncomment\nCd 0 zero 0\n";
        let err = XyzFile::read_from(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(err, XyzError::Parse { line: 3, .. }), "{err:?}");
    }

    #[test]
    fn read_from_rejects_inconsistent_frames() {
        let input = "1\na\nCd 0 0 0\n2\nb\nCd 0 0 0\nO 1 0 0\n";
        let err = XyzFile::read_from(&mut Cursor::new(input)).unwrap_err();
        assert!(matches!(
            err,
            XyzError::Trajectory(TrajectoryError::InconsistentFrame { frame: 1, .. })
        ));
    }

    #[test]
    fn empty_input_is_an_empty_trajectory_error() {
        let err = XyzFile::read_from(&mut Cursor::new("")).unwrap_err();
        assert!(matches!(err, XyzError::Trajectory(TrajectoryError::Empty)));
    }

    #[test]
    fn write_then_read_preserves_coordinates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.xyz");
        let (traj, meta) = XyzFile::read_from(&mut Cursor::new(TWO_FRAMES)).unwrap();
        XyzFile::write_to_path(&traj, &meta, &path).unwrap();
        let (reread, reread_meta) = XyzFile::read_from_path(&path).unwrap();
        assert_eq!(reread, traj);
        assert_eq!(reread_meta, meta);
    }
}
