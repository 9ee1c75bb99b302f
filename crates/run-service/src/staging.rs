use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use system_utils::path::{join_within, sanitize_component, PathError};

#[derive(Debug, thiserror::Error)]
pub(crate) enum StagingError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("failed to stage {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct UploadedFile {
    pub(crate) file_name: String,
    pub(crate) bytes: Bytes,
}

/// Lays out per-owner job directories under the storage root.
#[derive(Debug, Clone)]
pub(crate) struct Staging {
    root: PathBuf,
    default_basedir: String,
}

impl Staging {
    pub(crate) fn new(root: impl Into<PathBuf>, default_basedir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            default_basedir: default_basedir.into(),
        }
    }

    pub(crate) fn owner_workspace(&self, owner: &str) -> PathBuf {
        self.root.join(sanitize_component(owner))
    }

    /// `basedir` is read as a path inside the owner workspace, with or without
    /// a leading `/workspace`. A missing `job_dirname` gets a fresh unique
    /// name; an empty one means the base directory itself.
    pub(crate) fn resolve_job_dir(
        &self,
        owner: &str,
        basedir: Option<&str>,
        job_dirname: Option<&str>,
    ) -> Result<PathBuf, StagingError> {
        let basedir = basedir
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.default_basedir);
        let base = join_within(&self.owner_workspace(owner), strip_workspace(basedir))?;
        let job_dir = match job_dirname.map(str::trim) {
            None => base.join(generate_job_dirname()),
            Some("") => base,
            Some(name) => join_within(&base, name)?,
        };
        Ok(job_dir)
    }

    /// Creates `job_dir` and writes each upload by its base name.
    pub(crate) async fn prepare(
        &self,
        job_dir: &Path,
        files: Vec<UploadedFile>,
    ) -> Result<Vec<PathBuf>, StagingError> {
        tokio::fs::create_dir_all(job_dir)
            .await
            .map_err(|source| StagingError::Io {
                path: job_dir.to_path_buf(),
                source,
            })?;
        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let Some(name) = base_name(&file.file_name) else {
                tracing::debug!(event = "staging.skipped", file_name = %file.file_name);
                continue;
            };
            let path = job_dir.join(name);
            tokio::fs::write(&path, &file.bytes)
                .await
                .map_err(|source| StagingError::Io {
                    path: path.clone(),
                    source,
                })?;
            written.push(path);
        }
        tracing::info!(
            event = "staging.prepared",
            job_dir = %job_dir.display(),
            files = written.len(),
        );
        Ok(written)
    }
}

fn strip_workspace(basedir: &str) -> &str {
    let trimmed = basedir.trim_start_matches('/');
    match trimmed.strip_prefix("workspace") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => trimmed,
    }
}

fn base_name(file_name: &str) -> Option<&str> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name).trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// `job-<UTC stamp>-<8 hex>`, unique enough for concurrent submissions.
pub(crate) fn generate_job_dirname() -> String {
    let stamp = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
    let compact: String = stamp.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("job-{compact}-{}", &suffix[..8])
}
