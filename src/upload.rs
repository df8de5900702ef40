use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "gif", "tiff"];

pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Reduces a client supplied filename to something safe to put on disk:
/// ASCII only, no path separators, words joined with `_`.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

fn extension(filename: &str) -> Option<&str> {
    match filename.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < filename.len() => Some(&filename[idx..]),
        _ => None,
    }
}

/// `<uuid hex>_<unix seconds><.ext>`. The extension comes from the sanitized
/// name, or from the original when sanitizing swallowed it.
pub fn unique_name(original: &str) -> String {
    let sanitized = secure_filename(original);
    let ext = extension(&sanitized)
        .map(str::to_string)
        .or_else(|| extension(original).map(str::to_ascii_lowercase))
        .unwrap_or_default();

    format!(
        "{}_{}{}",
        Uuid::new_v4().simple(),
        Utc::now().timestamp(),
        ext
    )
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub name: String,
    pub path: PathBuf,
}

/// Append-only directory of uploaded images.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub async fn save(&self, original: &str, bytes: &[u8]) -> io::Result<StoredUpload> {
        let name = unique_name(original);
        let path = self.dir.join(&name);
        tokio::fs::write(&path, bytes).await?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "saved upload");
        Ok(StoredUpload { name, path })
    }
}
