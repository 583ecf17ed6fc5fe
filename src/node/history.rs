//! Undo backups and the per-file journal.
//!
//! Immediately before every committed write the live file is copied to
//! `versions/<file>_<ts>.bak` and a line `ts|backup|user|used` is appended
//! to `undo/<file>.undo`. UNDO consumes the newest entry whose `used` flag
//! is `0`, restoring its backup and marking it `used=1` in place; exhausted
//! entries are retained for inspection but no longer count as history.

use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use crate::protocol::status::StoreError;

use super::persistence::NodeStorage;

#[derive(Debug, Clone)]
struct JournalEntry {
    ts: i64,
    backup: String,
    user: String,
    used: bool,
}

impl JournalEntry {
    fn serialize(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.ts,
            self.backup,
            self.user,
            if self.used { 1 } else { 0 }
        )
    }

    /// Accepts the standard four-field form and the legacy three-field form
    /// (no used flag, treated as unused).
    fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 3 {
            return None;
        }
        Some(Self {
            ts: parts[0].parse().ok()?,
            backup: parts[1].to_string(),
            user: parts[2].to_string(),
            used: parts.get(3).map(|u| *u == "1").unwrap_or(false),
        })
    }
}

static LAST_TS: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp, strictly increasing within this process so that
/// backup names never collide and the journal stays total-ordered.
pub fn now_millis() -> i64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    LAST_TS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(wall.max(last + 1))
        })
        .map(|last| wall.max(last + 1))
        .unwrap_or(wall)
}

fn journal_path(store: &NodeStorage, file: &str) -> std::path::PathBuf {
    store.undo_dir().join(format!("{file}.undo"))
}

fn read_journal(store: &NodeStorage, file: &str) -> Vec<JournalEntry> {
    let Ok(raw) = fs::read_to_string(journal_path(store, file)) else {
        return Vec::new();
    };
    raw.lines().filter_map(JournalEntry::parse).collect()
}

fn write_journal(store: &NodeStorage, file: &str, entries: &[JournalEntry]) -> Result<()> {
    let mut body: String = entries
        .iter()
        .map(|e| e.serialize())
        .collect::<Vec<_>>()
        .join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(journal_path(store, file), body)?;
    Ok(())
}

/// Copies the current live file into `versions/` and journals it.
pub fn create_backup(store: &NodeStorage, file: &str, user: &str) -> Result<()> {
    let content = fs::read_to_string(store.file_path(file)).unwrap_or_default();
    let ts = now_millis();
    let backup_name = format!("{file}_{ts}.bak");
    fs::write(store.versions_dir().join(&backup_name), &content)?;

    let mut entries = read_journal(store, file);
    entries.push(JournalEntry {
        ts,
        backup: backup_name.clone(),
        user: user.to_string(),
        used: false,
    });
    write_journal(store, file, &entries)?;
    tracing::info!("Created backup {} for '{}' by {}", backup_name, file, user);
    Ok(())
}

/// Restores the newest unused backup over the live file and marks its
/// journal entry used. Fails with NotFound when no history remains.
pub fn perform_undo(store: &NodeStorage, file: &str) -> Result<(), StoreError> {
    let mut entries = read_journal(store, file);
    if entries.is_empty() {
        return Err(StoreError::NotFound(
            "No undo history available for this file".to_string(),
        ));
    }
    entries.sort_by(|a, b| b.ts.cmp(&a.ts));

    let Some(target) = entries.iter_mut().find(|e| !e.used) else {
        return Err(StoreError::NotFound(
            "No undo history available for this file".to_string(),
        ));
    };

    let backup_path = store.versions_dir().join(&target.backup);
    let content = fs::read_to_string(&backup_path)
        .map_err(|_| StoreError::Internal(format!("Backup {} is missing", target.backup)))?;

    store.replace_file(file, &content)?;
    target.used = true;
    let restored = target.backup.clone();

    let remaining = entries.iter().filter(|e| !e.used).count();
    write_journal(store, file, &entries)
        .map_err(|e| StoreError::Internal(format!("Could not rewrite undo journal: {e}")))?;
    tracing::info!(
        "UNDO restored '{}' from {} ({} undo step(s) remaining)",
        file,
        restored,
        remaining
    );
    Ok(())
}

/// How many undo steps remain available.
pub fn remaining_undos(store: &NodeStorage, file: &str) -> usize {
    read_journal(store, file).iter().filter(|e| !e.used).count()
}
