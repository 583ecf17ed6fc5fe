//! On-disk layout and the persisted per-file metadata table.
//!
//! Everything a Node owns lives under one base directory (`ss_<port>/`):
//!
//! ```text
//! files/                   live file content (plus in-flight *.swap files)
//! metadata/metadata.txt    one comma-delimited record per file
//! undo/<file>.undo         pipe-delimited undo journal
//! versions/                full pre-commit backups
//! checkpoints/             tagged snapshots
//! checkpoint_meta/<file>.meta
//! access_requests/<file>.requests
//! logs/
//! ```
//!
//! Metadata field order is fixed:
//! `filename,size,word_count,created,modified,last_accessed,last_accessed_by|-,owner|-,folder|-,acl_count,acl_entries`
//! with ACL entries serialised `user:perm;user:perm;...`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use dashmap::DashMap;
use regex::Regex;

use crate::protocol::status::StoreError;
use crate::protocol::types::{AclEntry, FileRecordWire, FileStats, Permission};

use super::sentences;

/// Authoritative metadata for one stored file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub filename: String,
    pub size: i64,
    pub word_count: i64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
    pub owner: String,
    pub folder: String,
    pub acl: Vec<AclEntry>,
}

impl FileMeta {
    fn new(filename: &str, now: i64) -> Self {
        Self {
            filename: filename.to_string(),
            size: 0,
            word_count: 0,
            created: now,
            modified: now,
            last_accessed: now,
            last_accessed_by: String::new(),
            owner: String::new(),
            folder: String::new(),
            acl: Vec::new(),
        }
    }

    pub fn to_wire(&self) -> FileRecordWire {
        FileRecordWire {
            name: self.filename.clone(),
            owner: self.owner.clone(),
            acl: self.acl.clone(),
            word_count: self.word_count,
            char_count: self.size,
            created: self.created,
            modified: self.modified,
            last_accessed: self.last_accessed,
            last_accessed_by: self.last_accessed_by.clone(),
            folder: self.folder.clone(),
        }
    }

    pub fn stats(&self) -> FileStats {
        FileStats {
            word_count: self.word_count,
            char_count: self.size,
            created: self.created,
            modified: self.modified,
            last_accessed: self.last_accessed,
            last_accessed_by: self.last_accessed_by.clone(),
        }
    }

    fn serialize(&self) -> String {
        let field = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };
        let acl: String = self
            .acl
            .iter()
            .map(|e| format!("{}:{};", e.identity, e.permission as u32))
            .collect();
        format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.filename,
            self.size,
            self.word_count,
            self.created,
            self.modified,
            self.last_accessed,
            field(&self.last_accessed_by),
            field(&self.owner),
            field(&self.folder),
            self.acl.len(),
            acl
        )
    }

    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.splitn(11, ',');
        let filename = parts.next()?.to_string();
        if filename.is_empty() {
            return None;
        }
        let size = parts.next()?.parse().ok()?;
        let word_count = parts.next()?.parse().ok()?;
        let created = parts.next()?.parse().ok()?;
        let modified = parts.next()?.parse().ok()?;
        let last_accessed = parts.next()?.parse().ok()?;
        let dashed = |s: &str| if s == "-" { String::new() } else { s.to_string() };
        let last_accessed_by = dashed(parts.next()?);
        let owner = dashed(parts.next()?);
        let folder = dashed(parts.next()?);
        let _acl_count: usize = parts.next()?.parse().ok()?;
        let mut acl = Vec::new();
        if let Some(raw_acl) = parts.next() {
            for item in raw_acl.split(';').filter(|s| !s.is_empty()) {
                let (identity, raw_perm) = item.split_once(':')?;
                let permission = Permission::from_u32(raw_perm.parse().ok()?)?;
                acl.push(AclEntry {
                    identity: identity.to_string(),
                    permission,
                });
            }
        }
        Some(Self {
            filename,
            size,
            word_count,
            created,
            modified,
            last_accessed,
            last_accessed_by,
            owner,
            folder,
            acl,
        })
    }
}

/// Disk-backed store rooted at `ss_<port>/`, with the metadata table held
/// in memory and rewritten to `metadata/metadata.txt` on every change.
pub struct NodeStorage {
    base: PathBuf,
    pub files: DashMap<String, FileMeta>,
}

impl NodeStorage {
    /// Opens (creating if needed) the storage tree, loads the metadata
    /// table, and deletes orphan swap files left by a previous run.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let store = Self {
            base,
            files: DashMap::new(),
        };
        for dir in [
            store.files_dir(),
            store.metadata_dir(),
            store.undo_dir(),
            store.versions_dir(),
            store.checkpoints_dir(),
            store.checkpoint_meta_dir(),
            store.requests_dir(),
            store.logs_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        store.load_metadata()?;
        let removed = store.clean_orphan_swaps();
        if removed > 0 {
            tracing::info!("Removed {} orphan swap file(s) on startup", removed);
        }
        Ok(store)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn files_dir(&self) -> PathBuf {
        self.base.join("files")
    }

    fn metadata_dir(&self) -> PathBuf {
        self.base.join("metadata")
    }

    pub fn undo_dir(&self) -> PathBuf {
        self.base.join("undo")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.base.join("versions")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.base.join("checkpoints")
    }

    pub fn checkpoint_meta_dir(&self) -> PathBuf {
        self.base.join("checkpoint_meta")
    }

    pub fn requests_dir(&self) -> PathBuf {
        self.base.join("access_requests")
    }

    fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    fn metadata_path(&self) -> PathBuf {
        self.metadata_dir().join("metadata.txt")
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.files_dir().join(name)
    }

    pub fn swap_path(&self, name: &str, sentence: usize, session: u64) -> PathBuf {
        self.files_dir()
            .join(format!("{name}_{sentence}_{session}.swap"))
    }

    fn load_metadata(&self) -> Result<()> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(&path)?;
        for line in raw.lines() {
            if let Some(meta) = FileMeta::parse(line) {
                self.files.insert(meta.filename.clone(), meta);
            } else if !line.trim().is_empty() {
                tracing::warn!("Skipping malformed metadata line: {}", line);
            }
        }
        tracing::info!("Loaded {} metadata entries", self.files.len());
        Ok(())
    }

    pub fn save_metadata(&self) -> Result<()> {
        let mut lines: Vec<String> = self
            .files
            .iter()
            .map(|entry| entry.value().serialize())
            .collect();
        lines.sort();
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(self.metadata_path(), body)?;
        Ok(())
    }

    /// Deletes every `files/` entry matching `*_<digits>_<digits>.swap`.
    pub fn clean_orphan_swaps(&self) -> usize {
        let pattern = Regex::new(r"^.+_\d+_\d+\.swap$").expect("static regex");
        let mut removed = 0;
        let Ok(entries) = fs::read_dir(self.files_dir()) else {
            return 0;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if pattern.is_match(&name) && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    // --- file operations ---

    pub fn create_file(&self, name: &str, owner: &str) -> Result<(), StoreError> {
        if self.files.contains_key(name) {
            return Err(StoreError::Conflict("File already exists".to_string()));
        }
        fs::write(self.file_path(name), b"")
            .map_err(|e| StoreError::Internal(format!("Could not create file: {e}")))?;
        let mut meta = FileMeta::new(name, now_secs());
        meta.owner = owner.to_string();
        self.files.insert(name.to_string(), meta);
        self.persist();
        Ok(())
    }

    pub fn delete_file(&self, name: &str) -> Result<(), StoreError> {
        if self.files.remove(name).is_none() {
            return Err(StoreError::NotFound("File not found".to_string()));
        }
        let _ = fs::remove_file(self.file_path(name));
        self.persist();
        Ok(())
    }

    pub fn read_file(&self, name: &str) -> Result<String, StoreError> {
        if !self.files.contains_key(name) {
            return Err(StoreError::NotFound("File not found".to_string()));
        }
        fs::read_to_string(self.file_path(name))
            .map_err(|e| StoreError::Internal(format!("Could not read file: {e}")))
    }

    /// Replaces the live file atomically: write a temp sibling, then rename.
    pub fn replace_file(&self, name: &str, content: &str) -> Result<(), StoreError> {
        let path = self.file_path(name);
        let tmp = self.files_dir().join(format!("{name}.tmp"));
        fs::write(&tmp, content)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| StoreError::Internal(format!("Could not finalize changes: {e}")))?;
        self.refresh_stats(name);
        Ok(())
    }

    /// Recomputes size/word count and bumps the modification time.
    pub fn refresh_stats(&self, name: &str) {
        let content = fs::read_to_string(self.file_path(name)).unwrap_or_default();
        if let Some(mut meta) = self.files.get_mut(name) {
            meta.size = content.len() as i64;
            meta.word_count = sentences::word_count(&content);
            meta.modified = now_secs();
        }
        self.persist();
    }

    pub fn touch_access(&self, name: &str, identity: &str) {
        if let Some(mut meta) = self.files.get_mut(name) {
            meta.last_accessed = now_secs();
            meta.last_accessed_by = identity.to_string();
        }
        self.persist();
    }

    pub fn set_owner(&self, name: &str, owner: &str) {
        if let Some(mut meta) = self.files.get_mut(name) {
            meta.owner = owner.to_string();
        }
        self.persist();
    }

    pub fn set_folder(&self, name: &str, folder: &str) {
        if let Some(mut meta) = self.files.get_mut(name) {
            meta.folder = folder.to_string();
        }
        self.persist();
    }

    pub fn set_acl(&self, name: &str, identity: &str, permission: Permission) {
        if let Some(mut meta) = self.files.get_mut(name) {
            if let Some(entry) = meta.acl.iter_mut().find(|e| e.identity == identity) {
                entry.permission = permission;
            } else if meta.acl.len() < crate::protocol::types::MAX_ACL_ENTRIES {
                meta.acl.push(AclEntry {
                    identity: identity.to_string(),
                    permission,
                });
            }
        }
        self.persist();
    }

    pub fn remove_acl(&self, name: &str, identity: &str) {
        if let Some(mut meta) = self.files.get_mut(name) {
            meta.acl.retain(|e| e.identity != identity);
        }
        self.persist();
    }

    // --- queries ---

    pub fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn is_owner(&self, name: &str, identity: &str) -> bool {
        self.files
            .get(name)
            .map(|m| m.owner == identity)
            .unwrap_or(false)
    }

    /// Owner always passes; otherwise the ACL must carry an entry for the
    /// identity with permission >= `needed`.
    pub fn check_permission(&self, name: &str, identity: &str, needed: Permission) -> bool {
        let Some(meta) = self.files.get(name) else {
            return false;
        };
        if meta.owner == identity || meta.owner.is_empty() {
            return true;
        }
        meta.acl
            .iter()
            .any(|e| e.identity == identity && e.permission.allows(needed))
    }

    pub fn stats_of(&self, name: &str) -> Option<FileStats> {
        self.files.get(name).map(|m| m.stats())
    }

    pub fn owned_files(&self, identity: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter(|e| e.value().owner == identity)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn registration_records(&self) -> Vec<FileRecordWire> {
        self.files.iter().map(|e| e.value().to_wire()).collect()
    }

    fn persist(&self) {
        if let Err(e) = self.save_metadata() {
            tracing::error!("Failed to persist metadata: {}", e);
        }
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
