use crate::core::models::trajectory::Trajectory;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Defines the interface for reading and writing multi-frame trajectory formats.
pub trait TrajectoryFile {
    /// Per-file information that is not part of the coordinates.
    type Metadata;

    type Error: Error + From<io::Error>;

    /// Reads every frame from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or the frames are inconsistent.
    fn read_from(reader: &mut impl BufRead) -> Result<(Trajectory, Self::Metadata), Self::Error>;

    fn write_to(
        trajectory: &Trajectory,
        metadata: &Self::Metadata,
        writer: &mut impl Write,
    ) -> Result<(), Self::Error>;

    fn read_from_path<P: AsRef<Path>>(
        path: P,
    ) -> Result<(Trajectory, Self::Metadata), Self::Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    fn write_to_path<P: AsRef<Path>>(
        trajectory: &Trajectory,
        metadata: &Self::Metadata,
        path: P,
    ) -> Result<(), Self::Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_to(trajectory, metadata, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
