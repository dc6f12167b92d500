//! Local storage for generated images.
//!
//! Each image is written as `<dir>/<task_id>_<n>.<ext>` next to a PNG
//! thumbnail `<task_id>_<n>_thumb.png`, and served under the public files
//! URL by the HTTP layer.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{GenericImageView, ImageFormat};
use imagegen_core::messages::ArtifactInfo;
use imagegen_providers::GeneratedImage;

/// Longest edge of a thumbnail, in pixels.
pub const THUMBNAIL_SIZE: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to write artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("thumbnail worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct ArtifactStore {
    dir: PathBuf,
    public_url: String,
}

/// What the blocking image pass learned about a file.
struct ImageFacts {
    width: Option<i32>,
    height: Option<i32>,
    thumbnail: Option<PathBuf>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the `index`-th image of a task.
    ///
    /// Bytes the `image` crate cannot decode are still stored, just without
    /// dimensions or a thumbnail.
    pub async fn save(
        &self,
        task_id: &str,
        index: usize,
        image: &GeneratedImage,
    ) -> Result<ArtifactInfo, ArtifactError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io_error(&self.dir, source))?;

        let stem = format!("{task_id}_{index}");
        let file_name = format!("{stem}.{}", image.extension());
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &image.bytes)
            .await
            .map_err(|source| io_error(&path, source))?;

        let thumb_path = self.dir.join(format!("{stem}_thumb.png"));
        let bytes = image.bytes.clone();
        let facts = tokio::task::spawn_blocking(move || inspect(&bytes, &thumb_path)).await?;

        Ok(ArtifactInfo {
            id: stem,
            task_id: task_id.to_string(),
            file_path: Some(path.to_string_lossy().into_owned()),
            thumbnail_path: facts.thumbnail.map(|p| p.to_string_lossy().into_owned()),
            image_url: Some(format!("{}/{file_name}", self.public_url)),
            width: facts.width,
            height: facts.height,
        })
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Decode dimensions and write the thumbnail. Runs on a blocking thread.
fn inspect(bytes: &[u8], thumb_path: &Path) -> ImageFacts {
    let decoded = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(error = %e, "Generated image could not be decoded");
            return ImageFacts {
                width: None,
                height: None,
                thumbnail: None,
            };
        }
    };

    let (width, height) = decoded.dimensions();
    let thumb = decoded.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    let mut encoded = Cursor::new(Vec::new());
    let thumbnail = match thumb
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|e| e.to_string())
        .and_then(|()| std::fs::write(thumb_path, encoded.get_ref()).map_err(|e| e.to_string()))
    {
        Ok(()) => Some(thumb_path.to_path_buf()),
        Err(e) => {
            tracing::warn!(error = %e, path = %thumb_path.display(), "Failed to write thumbnail");
            None
        }
    };

    ImageFacts {
        width: i32::try_from(width).ok(),
        height: i32::try_from(height).ok(),
        thumbnail,
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgb};

    use super::*;

    fn png(width: u32, height: u32) -> GeneratedImage {
        let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        GeneratedImage {
            bytes: out.into_inner(),
            mime_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn save_writes_file_and_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "/files/");

        let info = store.save("task-1", 0, &png(600, 300)).await.unwrap();

        assert_eq!(info.id, "task-1_0");
        assert_eq!(info.image_url.as_deref(), Some("/files/task-1_0.png"));
        assert_eq!(info.width, Some(600));
        assert_eq!(info.height, Some(300));
        assert!(dir.path().join("task-1_0.png").exists());

        let thumb = image::open(info.thumbnail_path.unwrap()).unwrap();
        assert_eq!(thumb.dimensions(), (THUMBNAIL_SIZE, THUMBNAIL_SIZE / 2));
    }

    #[tokio::test]
    async fn undecodable_bytes_stored_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "/files");
        let image = GeneratedImage {
            bytes: b"not an image".to_vec(),
            mime_type: "image/jpeg".into(),
        };

        let info = store.save("t", 2, &image).await.unwrap();

        assert_eq!(info.image_url.as_deref(), Some("/files/t_2.jpg"));
        assert!(info.width.is_none());
        assert!(info.thumbnail_path.is_none());
    }
}
