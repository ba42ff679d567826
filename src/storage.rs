//! Artifact upload to object storage.
//!
//! Uploads overwrite whatever already sits at the destination. Directory
//! uploads stop at the first failure; objects written before it stay put.
use crate::config::Credential;
use crate::http;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const GCS_UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/b";

pub trait ObjectStore: Send + Sync {
    /// Write `bytes` to `bucket/path` and return its addressable location.
    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<String>;
}

/// Upload an in-memory payload.
pub fn upload_bytes(store: &dyn ObjectStore, bucket: &str, dest_path: &str, bytes: &[u8]) -> Result<String> {
    let location = store.put(bucket, dest_path, bytes)?;
    tracing::info!(%location, bytes = bytes.len(), "uploaded object");
    Ok(location)
}

pub fn upload_file(store: &dyn ObjectStore, local_path: &Path, bucket: &str, dest_path: &str) -> Result<String> {
    let bytes = fs::read(local_path).with_context(|| format!("read {}", local_path.display()))?;
    upload_bytes(store, bucket, dest_path, &bytes)
}

/// Upload every file under `local_dir`, keeping relative paths under `prefix`.
pub fn upload_directory(
    store: &dyn ObjectStore,
    local_dir: &Path,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>> {
    let prefix = prefix.trim_end_matches('/');
    let mut uploaded = Vec::new();
    for path in collect_files_recursive(local_dir)? {
        let rel = path
            .strip_prefix(local_dir)
            .with_context(|| format!("relativize {}", path.display()))?;
        let rel = rel
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let dest = if prefix.is_empty() {
            rel
        } else {
            format!("{prefix}/{rel}")
        };
        uploaded.push(upload_file(store, &path, bucket, &dest)?);
    }
    Ok(uploaded)
}

fn collect_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            files.extend(collect_files_recursive(&path)?);
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Cloud object storage through the JSON upload API.
pub struct GcsStore {
    agent: ureq::Agent,
    credential: Credential,
}

impl GcsStore {
    pub fn new(credential: Credential) -> Self {
        Self {
            agent: http::agent(UPLOAD_TIMEOUT),
            credential,
        }
    }
}

impl ObjectStore for GcsStore {
    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<String> {
        let url = format!("{GCS_UPLOAD_BASE}/{bucket}/o");
        let request = self
            .agent
            .post(url.as_str())
            .query("uploadType", "media")
            .query("name", path)
            .header("Content-Type", content_type(path));
        let mut response = http::authorize(request, &self.credential)
            .send(bytes)
            .with_context(|| format!("upload gs://{bucket}/{path}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(anyhow!(
                "upload gs://{bucket}/{path} failed with status {}: {}",
                status.as_u16(),
                body.trim()
            ));
        }
        Ok(format!("gs://{bucket}/{path}"))
    }
}

fn content_type(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|ext| ext.to_str()) {
        Some("py" | "txt" | "md" | "csv") => "text/plain; charset=utf-8",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Buckets as directories under a local root.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        let mut dest = self.root.join(checked_component(bucket)?);
        let rel = Path::new(path);
        for part in rel.components() {
            match part {
                Component::Normal(name) => dest.push(name),
                _ => return Err(anyhow!("object path must be relative and normalized: {path}")),
            }
        }
        if dest == self.root.join(bucket) {
            return Err(anyhow!("object path is empty"));
        }
        Ok(dest)
    }
}

fn checked_component(name: &str) -> Result<&str> {
    let valid = !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != "..";
    if valid {
        Ok(name)
    } else {
        Err(anyhow!("invalid bucket name: {name:?}"))
    }
}

impl ObjectStore for LocalStore {
    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<String> {
        let dest = self.object_path(bucket, path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let file_name = dest
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("object");
        let tmp_path = dest.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, bytes).with_context(|| format!("write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &dest).with_context(|| format!("publish {}", dest.display()))?;
        Ok(format!("file://{}", dest.display()))
    }
}
