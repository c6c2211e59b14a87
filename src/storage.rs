use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::error::AppError;

// Partially-written files live here until claimed; the directory name is
// never a valid download token.
pub const STAGING_DIR: &str = ".staging";

pub const EXPORT_EXTENSION: &str = ".xlsx";

pub const EXPORT_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub const NOT_FOUND_MESSAGE: &str = "file not found or expired";

// Flat directory of finished exports. The filename doubles as the download
// token: finished files appear only via claim(), and lookups accept a single
// normal path component.
#[derive(Debug, Clone)]
pub struct ExportStore {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolvedExport {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl ExportStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_path(&self) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("report-{}{EXPORT_EXTENSION}", Uuid::new_v4()))
    }

    // Publishes a staging file under `base`, probing base-1, base-2, ... on
    // collision. Returns the final filename, which is the token.
    pub async fn claim(&self, staging: &Path, base: &str) -> std::io::Result<String> {
        let mut attempt: u32 = 0;
        loop {
            let candidate = if attempt == 0 {
                format!("{base}{EXPORT_EXTENSION}")
            } else {
                format!("{base}-{attempt}{EXPORT_EXTENSION}")
            };
            // hard_link fails if the name is taken, so two concurrent claims
            // with the same base can never land on the same file
            match tokio::fs::hard_link(staging, self.root.join(&candidate)).await {
                Ok(()) => {
                    if let Err(error) = tokio::fs::remove_file(staging).await {
                        tracing::warn!(
                            staging = %staging.display(),
                            error = %error,
                            "Claimed export but failed to drop its staging file"
                        );
                    }
                    return Ok(candidate);
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(error) => return Err(error),
            }
        }
    }

    pub async fn resolve(&self, token: &str) -> Result<ResolvedExport, AppError> {
        // a bad token gets the same not-found answer as a missing file, so
        // probing reveals nothing
        if !is_valid_token(token) {
            return Err(AppError::NotFound(NOT_FOUND_MESSAGE.to_string()));
        }
        let path = self.root.join(token);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ResolvedExport {
                name: token.to_string(),
                path,
                size_bytes: meta.len(),
            }),
            _ => Err(AppError::NotFound(NOT_FOUND_MESSAGE.to_string())),
        }
    }

    pub async fn sweep_expired(&self, retention: Duration) -> std::io::Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        // staging leftovers from crashed exports age out on the same schedule
        for dir in [self.root.clone(), self.root.join(STAGING_DIR)] {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let Ok(modified) = meta.modified() else {
                    continue;
                };
                if modified < cutoff {
                    match tokio::fs::remove_file(entry.path()).await {
                        Ok(()) => removed += 1,
                        Err(error) => tracing::warn!(
                            path = %entry.path().display(),
                            error = %error,
                            "Failed to remove expired export"
                        ),
                    }
                }
            }
        }

        Ok(removed)
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token != "."
        && token != ".."
        && !token.contains(['/', '\\', '\0'])
}
