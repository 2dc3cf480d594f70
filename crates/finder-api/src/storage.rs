use anyhow::{Result, bail};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest file extension kept from an uploaded file name.
const MAX_EXTENSION_LEN: usize = 8;

/// Object storage for case photos.
///
/// Each photo lives at `{dir}/{user_id}/{random}.{ext}` and is published as
/// `{public_base_url}/photos/{user_id}/{random}.{ext}`. The key namespace is
/// the uploading user's id.
pub struct PhotoStore {
    dir: PathBuf,
    public_base_url: String,
}

/// A successfully written photo.
#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub key: String,
    pub url: String,
}

impl PhotoStore {
    pub async fn new(dir: PathBuf, public_base_url: String) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Photo storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/photos/{}", self.public_base_url, key)
    }

    /// Write a photo under a fresh random key in `user_id`'s namespace.
    pub async fn put(
        &self,
        user_id: Uuid,
        original_name: Option<&str>,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredPhoto> {
        if bytes.is_empty() {
            bail!("refusing to store an empty photo");
        }

        let extension = photo_extension(original_name, content_type);
        let file_name = format!("{}.{}", Uuid::new_v4().simple(), extension);
        let user_dir = self.user_dir(user_id);
        fs::create_dir_all(&user_dir).await?;

        let path = user_dir.join(&file_name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        let key = format!("{}/{}", user_id, file_name);
        info!("Stored photo {} ({} bytes)", key, bytes.len());
        Ok(StoredPhoto {
            url: self.public_url(&key),
            key,
        })
    }

    /// Remove a stored photo. Missing files are not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let Some(path) = self.resolve_key(key) else {
            bail!("invalid photo key '{}'", key);
        };
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted photo {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Photo {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// On-disk path for `{user_id}/{file_name}`, or `None` when either part
    /// could escape the storage directory.
    pub fn resolve(&self, user_id: &str, file_name: &str) -> Option<PathBuf> {
        let user_id: Uuid = user_id.parse().ok()?;
        if !is_safe_file_name(file_name) {
            return None;
        }
        Some(self.user_dir(user_id).join(file_name))
    }

    /// Directory holding every photo uploaded by `user_id`.
    pub fn user_dir(&self, user_id: Uuid) -> PathBuf {
        self.dir.join(user_id.to_string())
    }

    fn resolve_key(&self, key: &str) -> Option<PathBuf> {
        let (user_id, file_name) = key.split_once('/')?;
        self.resolve(user_id, file_name)
    }
}

/// Extension for a stored photo: the uploaded name's last extension, else
/// the content-type subtype, else `bin`.
pub fn photo_extension(original_name: Option<&str>, content_type: &str) -> String {
    let from_name = original_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext);
    let from_type = content_type
        .split(';')
        .next()
        .and_then(|mime| mime.trim().strip_prefix("image/"))
        .map(|subtype| match subtype {
            "jpeg" | "pjpeg" => "jpg",
            "svg+xml" => "svg",
            other => other,
        });

    [from_name, from_type]
        .into_iter()
        .flatten()
        .map(str::to_ascii_lowercase)
        .find(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// Content type to serve a stored photo with, from its extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        "heic" => "image/heic",
        // SVG can carry script; never serve it inline
        _ => "application/octet-stream",
    }
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}
