//! Immutable tagged snapshots and revert.
//!
//! A checkpoint is a full copy of the file at creation time, stored as
//! `checkpoints/<file>_<tag>.checkpoint` with a metadata line
//! `ts|tag|creator|size` appended to `checkpoint_meta/<file>.meta`. Tags
//! are unique per file; checkpoints survive everything except deletion of
//! the file itself.

use std::fs;

use chrono::DateTime;

use crate::protocol::status::StoreError;

use super::history;
use super::persistence::{NodeStorage, now_secs};

fn snapshot_path(store: &NodeStorage, file: &str, tag: &str) -> std::path::PathBuf {
    store
        .checkpoints_dir()
        .join(format!("{file}_{tag}.checkpoint"))
}

fn meta_path(store: &NodeStorage, file: &str) -> std::path::PathBuf {
    store.checkpoint_meta_dir().join(format!("{file}.meta"))
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn create(store: &NodeStorage, file: &str, tag: &str, user: &str) -> Result<(), StoreError> {
    let content = store.read_file(file)?;
    let path = snapshot_path(store, file, tag);
    if path.exists() {
        return Err(StoreError::Conflict(
            "Checkpoint tag already exists".to_string(),
        ));
    }
    fs::write(&path, &content)
        .map_err(|e| StoreError::Internal(format!("Failed to create checkpoint: {e}")))?;

    let line = format!("{}|{}|{}|{}\n", now_secs(), tag, user, content.len());
    let mut meta = fs::read_to_string(meta_path(store, file)).unwrap_or_default();
    meta.push_str(&line);
    fs::write(meta_path(store, file), meta)
        .map_err(|e| StoreError::Internal(format!("Failed to record checkpoint: {e}")))?;
    tracing::info!("Created checkpoint '{}' for '{}' by {}", tag, file, user);
    Ok(())
}

pub fn view(store: &NodeStorage, file: &str, tag: &str) -> Result<String, StoreError> {
    fs::read_to_string(snapshot_path(store, file, tag))
        .map_err(|_| StoreError::NotFound("Checkpoint not found".to_string()))
}

/// Rewrites the live file to the checkpoint's content. A backup is taken
/// first, so a single UNDO returns to the pre-revert state.
pub fn revert(store: &NodeStorage, file: &str, tag: &str, user: &str) -> Result<(), StoreError> {
    let snapshot = view(store, file, tag)?;
    history::create_backup(store, file, user)
        .map_err(|e| StoreError::Internal(format!("Could not back up before revert: {e}")))?;
    store.replace_file(file, &snapshot)?;
    tracing::info!("Reverted '{}' to checkpoint '{}' by {}", file, tag, user);
    Ok(())
}

/// Renders the checkpoint listing for one file.
pub fn list(store: &NodeStorage, file: &str) -> String {
    let Ok(meta) = fs::read_to_string(meta_path(store, file)) else {
        return "No checkpoints available".to_string();
    };

    let mut out = format!("Checkpoints for file: {file}\n");
    let mut count = 0;
    for line in meta.lines() {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 4 {
            continue;
        }
        let Ok(ts) = parts[0].parse::<i64>() else {
            continue;
        };
        out.push_str(&format!(
            "  Tag: {} | Created: {} | By: {} | Size: {} bytes\n",
            parts[1],
            format_timestamp(ts),
            parts[2],
            parts[3]
        ));
        count += 1;
    }
    if count == 0 {
        out.push_str("  No valid checkpoints found\n");
    } else {
        out.push_str(&format!("Total checkpoints: {count}\n"));
    }
    out
}
