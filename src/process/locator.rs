//! Discovery of CLI sessions from the Copilot session-state directory.
//!
//! The CLI keeps one subdirectory per session, each holding a
//! `workspace.yaml` with the session id, its working directory and the
//! last-update timestamp.  This module only ever reads that tree.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

/// File name the CLI writes inside every session directory.
pub const WORKSPACE_FILE: &str = "workspace.yaml";

#[derive(Debug, Deserialize)]
struct WorkspaceFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

/// One session found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub cwd: PathBuf,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Reads session records from a session-state root.
#[derive(Debug, Clone)]
pub struct SessionLocator {
    root: PathBuf,
}

impl SessionLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every readable session record under the root, in directory order.
    ///
    /// A missing root yields an empty list; unreadable or malformed
    /// entries are skipped.
    pub async fn list_sessions(&self) -> Vec<SessionRecord> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "session-state dir unreadable");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "session-state dir iteration failed");
                    break;
                }
            };
            let path = entry.path().join(WORKSPACE_FILE);
            if let Some(record) = read_record(&path).await {
                records.push(record);
            }
        }
        records
    }

    /// Id of the most recently updated session whose working directory is `dir`.
    pub async fn find_session_id_for_directory(&self, dir: &Path) -> Option<String> {
        let target = normalize(dir);
        let target_canonical = fs::canonicalize(dir).await.ok();

        let mut best: Option<SessionRecord> = None;
        for record in self.list_sessions().await {
            if !same_directory(&record.cwd, &target, target_canonical.as_deref()).await {
                continue;
            }
            // Records without a timestamp lose to any timestamped one.
            let newer = match &best {
                None => true,
                Some(current) => record.updated_at > current.updated_at,
            };
            if newer {
                best = Some(record);
            }
        }

        if let Some(ref found) = best {
            debug!(session_id = %found.id, dir = %dir.display(), "located CLI session");
        }
        best.map(|r| r.id)
    }
}

async fn read_record(path: &Path) -> Option<SessionRecord> {
    let contents = fs::read_to_string(path).await.ok()?;
    let parsed: WorkspaceFile = match serde_yaml::from_str(&contents) {
        Ok(p) => p,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping malformed workspace file");
            return None;
        }
    };

    let id = parsed.id.filter(|s| !s.is_empty())?;
    let cwd = parsed.cwd.filter(|s| !s.is_empty())?;
    let updated_at = parsed
        .updated_at
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Some(SessionRecord {
        id,
        cwd: PathBuf::from(cwd),
        updated_at,
    })
}

async fn same_directory(candidate: &Path, target: &Path, target_canonical: Option<&Path>) -> bool {
    if normalize(candidate) == target {
        return true;
    }
    match target_canonical {
        Some(t) => fs::canonicalize(candidate)
            .await
            .map(|c| c == t)
            .unwrap_or(false),
        None => false,
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
