//! JSON file persistence for [`AgentState`].
//!
//! One document per project under the state directory. Writes go to a
//! sibling temp file which is then renamed over the target, so a crash
//! mid-write leaves the previous document intact. An advisory lock on a
//! `.lock` file keeps two processes from interleaving writes.

use super::AgentState;
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for a project.
    pub fn path_for(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(project)))
    }

    pub fn exists(&self, project: &str) -> bool {
        self.path_for(project).exists()
    }

    /// Load a project's state. `Ok(None)` when nothing has been saved yet.
    pub fn load(&self, project: &str) -> Result<Option<AgentState>> {
        let path = self.path_for(project);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let mut state: AgentState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        state.rebuild_links();
        Ok(Some(state))
    }

    /// Persist the state, stamping `last_updated_at`.
    pub fn save(&self, state: &mut AgentState) -> Result<()> {
        state.last_updated_at = Utc::now();
        self.write(state)
    }

    /// Persist without touching timestamps.
    pub fn write(&self, state: &AgentState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))?;

        let lock_path = self.dir.join(".lock");
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        lock.lock_exclusive()
            .context("Failed to acquire state lock")?;

        let result = self.write_atomic(state);
        // Dropping the handle releases the lock as well; unlock explicitly so
        // the error is visible.
        lock.unlock().context("Failed to release state lock")?;
        result
    }

    fn write_atomic(&self, state: &AgentState) -> Result<()> {
        let path = self.path_for(&state.project);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;
        drop(file);

        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move state into place: {}", path.display()))?;
        Ok(())
    }

    /// Remove a project's state document.
    pub fn delete(&self, project: &str) -> Result<bool> {
        let path = self.path_for(project);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove state file: {}", path.display()))?;
        Ok(true)
    }

    /// Project names with a saved document, sorted.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                projects.push(stem.to_string());
            }
        }
        projects.sort();
        Ok(projects)
    }
}

/// File-name-safe form of a project name.
fn sanitize(project: &str) -> String {
    let cleaned: String = project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "project".to_string()
    } else {
        cleaned
    }
}
