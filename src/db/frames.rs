use log::debug;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::capture::Frame;
use crate::error::Error;

/// Writes event snapshots to the image directory as PGM files.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    directory: PathBuf,
}

impl FrameWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Store the frame under the event id and return the path reference
    pub async fn write(&self, event_id: Uuid, frame: &Frame) -> Result<String, Error> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| Error::Io(format!("Failed to create {:?}: {}", self.directory, e)))?;

        let path = self.path_for(event_id);
        tokio::fs::write(&path, frame.to_pgm())
            .await
            .map_err(|e| Error::Io(format!("Failed to write {:?}: {}", path, e)))?;

        debug!("Saved frame {} to {:?}", frame.id, path);
        Ok(path.to_string_lossy().into_owned())
    }

    /// Delete the snapshot of an event that was never stored. A missing
    /// file is not an error.
    pub async fn remove(&self, event_id: Uuid) -> Result<(), Error> {
        let path = self.path_for(event_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed orphaned frame {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("Failed to remove {:?}: {}", path, e))),
        }
    }

    fn path_for(&self, event_id: Uuid) -> PathBuf {
        self.directory.join(format!("{}.pgm", event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_pgm_named_after_event() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FrameWriter::new(dir.path().join("images"));
        let frame = Frame::new(2, 1, vec![10, 20]).unwrap();
        let event_id = Uuid::new_v4();

        let reference = writer.write(event_id, &frame).await.unwrap();
        assert!(reference.ends_with(&format!("{}.pgm", event_id)));

        let bytes = std::fs::read(&reference).unwrap();
        assert_eq!(bytes, frame.to_pgm());
    }

    #[tokio::test]
    async fn remove_deletes_snapshot_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FrameWriter::new(dir.path());
        let event_id = Uuid::new_v4();

        let reference = writer
            .write(event_id, &Frame::new(1, 1, vec![0]).unwrap())
            .await
            .unwrap();
        writer.remove(event_id).await.unwrap();
        assert!(!std::path::Path::new(&reference).exists());

        writer.remove(event_id).await.unwrap();
    }
}
