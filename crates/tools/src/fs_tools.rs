//! File tools: scoped reads, scoped writes with automatic backup, and
//! directory listing.

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    chrono::Utc,
    tracing::{debug, info},
};

use {torbo_common::text::truncate_output, torbo_policy::ScopePolicy};

use crate::shell::MAX_OUTPUT_CHARS;

/// Where pre-write backups land.
fn backup_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".torbo-backup"))
        .unwrap_or_else(|| PathBuf::from(".torbo-backup"))
}

/// Read a file inside the agent's scope. Output is capped like every other
/// tool result.
pub async fn read_file(policy: &ScopePolicy, raw_path: &str) -> Result<String> {
    let path = policy
        .check_read(raw_path)
        .map_err(|v| anyhow::anyhow!("BLOCKED: {v}"))?;

    let mut content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    truncate_output(&mut content, MAX_OUTPUT_CHARS);
    debug!(path = %path.display(), bytes = content.len(), "read_file");
    Ok(content)
}

/// Write a file inside the agent's scope. A pre-existing target is first
/// copied to `~/.torbo-backup/<timestamp>_<basename>`; the write itself is
/// atomic (temp + rename).
pub async fn write_file(policy: &ScopePolicy, raw_path: &str, content: &str) -> Result<String> {
    let path = policy
        .check_write(raw_path)
        .map_err(|v| anyhow::anyhow!("BLOCKED: {v}"))?;

    if path.exists() {
        let backup = backup_path(&path);
        if let Some(parent) = backup.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&path, &backup)
            .await
            .with_context(|| format!("failed to back up {}", path.display()))?;
        info!(path = %path.display(), backup = %backup.display(), "backed up before write");
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("torbo-write.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tokio::fs::rename(&tmp, &path).await?;

    Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
}

fn backup_path(path: &Path) -> PathBuf {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into());
    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S");
    backup_dir().join(format!("{stamp}_{basename}"))
}

/// List a directory inside the agent's scope. Directories get a trailing
/// slash; entries are sorted.
pub async fn list_directory(policy: &ScopePolicy, raw_path: &str) -> Result<String> {
    let path = policy
        .check_read(raw_path)
        .map_err(|v| anyhow::anyhow!("BLOCKED: {v}"))?;

    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(&path)
        .await
        .with_context(|| format!("failed to list {}", path.display()))?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(if is_dir { format!("{name}/") } else { name });
    }
    entries.sort();

    if entries.is_empty() {
        Ok(format!("{} is empty", path.display()))
    } else {
        Ok(entries.join("\n"))
    }
}
