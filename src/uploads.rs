//! Listing image storage on local disk.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use tokio::{fs::File, io::AsyncWriteExt};
use uuid::Uuid;

use crate::errors::Error;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Streams one multipart file field to `dir` under a fresh name and returns that name.
pub async fn store_image(dir: &Path, mut field: Field<'_>) -> Result<String, Error> {
    let file_name = field.file_name().unwrap_or_default().to_owned();
    let ext = extension_of(&file_name).ok_or_else(|| {
        Error::bad_request(format!(
            "Image must be one of: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))
    })?;
    let image_path = format!("{}.{}", Uuid::new_v4(), ext);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Other(e.into()))?;
    let file_path: PathBuf = dir.join(&image_path);
    let mut file = File::create(&file_path)
        .await
        .map_err(|e| Error::Other(e.into()))?;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                drop(file);
                remove_image(dir, &image_path).await;
                return Err(Error::bad_request(format!("Upload failed: {e}")));
            }
        };
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::Other(e.into()))?;
    }
    file.flush().await.map_err(|e| Error::Other(e.into()))?;

    tracing::debug!(path = %file_path.display(), "stored listing image");
    Ok(image_path)
}

/// Best-effort removal; a missing file is not an error.
pub async fn remove_image(dir: &Path, image_path: &str) {
    if let Err(e) = tokio::fs::remove_file(dir.join(image_path)).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(image_path, "could not remove image: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_image_extensions_pass() {
        assert_eq!(extension_of("house.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("plan.v2.png").as_deref(), Some("png"));
        assert_eq!(extension_of("script.sh"), None);
        assert_eq!(extension_of("noextension"), None);
    }
}
