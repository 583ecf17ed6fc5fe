//! The name-indexed file table, folder registry, and listing renderers.
//!
//! Every mutation and permission check goes through this one structure. The
//! map is sharded internally, so per-entry operations are serialised per
//! name while listings and purges iterate the shards.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::protocol::status::StoreError;
use crate::protocol::types::{
    AclEntry, FileRecordWire, FileStats, MAX_ACL_ENTRIES, Permission, VIEW_FLAG_ALL, VIEW_FLAG_LONG,
};

use super::types::{FileRecord, FolderMove, FolderRecord};

#[derive(Default)]
pub struct FileIndex {
    files: DashMap<String, FileRecord>,
    folders: DashMap<String, FolderRecord>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // --- file lifecycle ---

    /// Registers a brand-new file. Names are globally unique across Nodes.
    pub fn insert(&self, name: &str, slot: usize, owner: &str) -> Result<(), StoreError> {
        match self.files.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("File already exists".to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(FileRecord::new(name, slot, owner, now_secs()));
                Ok(())
            }
        }
    }

    /// Rebuilds one record from a registering Node. An existing record for
    /// the same name is replaced; the re-registering Node wins.
    pub fn rebuild(&self, slot: usize, wire: &FileRecordWire) {
        self.files
            .insert(wire.name.clone(), FileRecord::from_wire(slot, wire));
    }

    pub fn locate(&self, name: &str) -> Option<usize> {
        self.files.get(name).map(|r| r.slot)
    }

    pub fn details(&self, name: &str) -> Option<FileRecord> {
        self.files.get(name).map(|r| r.clone())
    }

    /// Removes a record; only the owner may delete. Returns the owning slot.
    pub fn remove(&self, name: &str, identity: &str) -> Result<usize, StoreError> {
        match self.files.entry(name.to_string()) {
            Entry::Vacant(_) => Err(StoreError::NotFound("File not found".to_string())),
            Entry::Occupied(occupied) => {
                if occupied.get().owner != identity {
                    return Err(StoreError::Unauthorized(
                        "Access Denied (Only owner can delete)".to_string(),
                    ));
                }
                let slot = occupied.get().slot;
                occupied.remove();
                Ok(slot)
            }
        }
    }

    /// Drops every record owned by `slot`; returns the purged names.
    pub fn purge_slot(&self, slot: usize) -> Vec<String> {
        let doomed: Vec<String> = self
            .files
            .iter()
            .filter(|e| e.value().slot == slot)
            .map(|e| e.key().clone())
            .collect();
        for name in &doomed {
            self.files.remove(name);
        }
        doomed
    }

    // --- permissions ---

    pub fn check(&self, name: &str, identity: &str, needed: Permission) -> bool {
        self.files
            .get(name)
            .map(|r| r.permits(identity, needed))
            .unwrap_or(false)
    }

    /// Grants `permission` on `name` to `target`. Only the owner may grant;
    /// the owner is never listed in the ACL; an identity appears at most
    /// once (re-grant updates in place).
    pub fn grant(
        &self,
        name: &str,
        owner: &str,
        target: &str,
        permission: Permission,
    ) -> Result<(), StoreError> {
        let Some(mut record) = self.files.get_mut(name) else {
            return Err(StoreError::NotFound("File not found".to_string()));
        };
        if record.owner != owner {
            return Err(StoreError::Unauthorized(
                "Access Denied (Not Owner)".to_string(),
            ));
        }
        if record.owner == target {
            return Err(StoreError::BadRequest(
                "Owner already has full access".to_string(),
            ));
        }
        if let Some(entry) = record.acl.iter_mut().find(|e| e.identity == target) {
            entry.permission = permission;
            return Ok(());
        }
        if record.acl.len() >= MAX_ACL_ENTRIES {
            return Err(StoreError::Conflict("ACL is full".to_string()));
        }
        record.acl.push(AclEntry {
            identity: target.to_string(),
            permission,
        });
        Ok(())
    }

    pub fn revoke(&self, name: &str, owner: &str, target: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.files.get_mut(name) else {
            return Err(StoreError::NotFound("File not found".to_string()));
        };
        if record.owner != owner {
            return Err(StoreError::Unauthorized(
                "Access Denied (Not Owner)".to_string(),
            ));
        }
        let before = record.acl.len();
        record.acl.retain(|e| e.identity != target);
        if record.acl.len() == before {
            return Err(StoreError::NotFound(
                "Identity not present in ACL".to_string(),
            ));
        }
        Ok(())
    }

    pub fn update_stats(&self, name: &str, stats: &FileStats) {
        if let Some(mut record) = self.files.get_mut(name) {
            record.apply_stats(stats);
        }
    }

    // --- folders ---

    pub fn add_folder(&self, name: &str, owner: &str) -> Result<(), StoreError> {
        match self.folders.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("Folder already exists".to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(FolderRecord {
                    name: name.to_string(),
                    owner: owner.to_string(),
                });
                Ok(())
            }
        }
    }

    pub fn folder_exists(&self, name: &str) -> bool {
        self.folders.contains_key(name)
    }

    /// Moves one file into `folder` (empty clears it). Owner only. Returns
    /// the owning slot so the change can be pushed to the Node.
    pub fn set_file_folder(
        &self,
        name: &str,
        folder: &str,
        identity: &str,
    ) -> Result<usize, StoreError> {
        if !folder.is_empty() && !self.folder_exists(folder) {
            return Err(StoreError::NotFound("Folder not found".to_string()));
        }
        let Some(mut record) = self.files.get_mut(name) else {
            return Err(StoreError::NotFound("File not found".to_string()));
        };
        if record.owner != identity {
            return Err(StoreError::Unauthorized(
                "Access Denied (Only owner can move file)".to_string(),
            ));
        }
        record.folder = folder.to_string();
        Ok(record.slot)
    }

    /// Renames folder `src` to `dst` and rewrites the folder path of every
    /// record inside `src` (including nested paths `src/...`). Returns the
    /// per-file updates to push to the owning Nodes.
    pub fn move_folder(
        &self,
        src: &str,
        dst: &str,
        identity: &str,
    ) -> Result<Vec<FolderMove>, StoreError> {
        {
            let Some(folder) = self.folders.get(src) else {
                return Err(StoreError::NotFound("Folder not found".to_string()));
            };
            if folder.owner != identity {
                return Err(StoreError::Unauthorized(
                    "Access Denied (Only owner can move folder)".to_string(),
                ));
            }
        }
        if self.folders.contains_key(dst) {
            return Err(StoreError::Conflict(
                "Destination folder already exists".to_string(),
            ));
        }

        let (_, record) = self.folders.remove(src).expect("checked above");
        self.folders.insert(
            dst.to_string(),
            FolderRecord {
                name: dst.to_string(),
                owner: record.owner,
            },
        );
        // Nested folders keep their suffix under the new prefix.
        let nested: Vec<(String, FolderRecord)> = self
            .folders
            .iter()
            .filter(|e| e.key().starts_with(&format!("{src}/")))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (old, folder) in nested {
            let renamed = format!("{dst}{}", &old[src.len()..]);
            self.folders.remove(&old);
            self.folders.insert(
                renamed.clone(),
                FolderRecord {
                    name: renamed,
                    owner: folder.owner,
                },
            );
        }

        let prefix = format!("{src}/");
        let mut updates = Vec::new();
        for mut entry in self.files.iter_mut() {
            let record = entry.value_mut();
            let renamed = if record.folder == src {
                dst.to_string()
            } else if record.folder.starts_with(&prefix) {
                format!("{dst}{}", &record.folder[src.len()..])
            } else {
                continue;
            };
            record.folder = renamed.clone();
            updates.push(FolderMove {
                file: record.name.clone(),
                folder: renamed,
                slot: record.slot,
            });
        }
        Ok(updates)
    }

    // --- listings ---

    /// Collects `(name, slot)` pairs for a statistics refresh: every file,
    /// or only the files directly inside `folder`.
    pub fn refresh_targets(&self, folder: Option<&str>) -> Vec<(String, usize)> {
        self.files
            .iter()
            .filter(|e| folder.is_none_or(|f| e.value().folder == f))
            .map(|e| (e.key().clone(), e.value().slot))
            .collect()
    }

    /// Top-level listing: folders containing no `/`, then files not inside
    /// any folder. Without `-a`, only entries the caller owns or can read.
    pub fn list_top(&self, identity: &str, flags: i32) -> String {
        let mut out = String::new();
        let mut folders: Vec<FolderRecord> = self
            .folders
            .iter()
            .filter(|e| !e.key().contains('/'))
            .map(|e| e.value().clone())
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        for folder in folders {
            out.push_str(&render_folder_row(&folder, flags));
        }

        let mut files: Vec<FileRecord> = self
            .files
            .iter()
            .filter(|e| e.value().folder.is_empty())
            .filter(|e| visible(e.value(), identity, flags))
            .map(|e| e.value().clone())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        for file in files {
            out.push_str(&render_file_row(&file, flags));
        }
        out
    }

    /// Immediate children of `folder`: sub-folders one level down, then the
    /// files whose folder path matches exactly.
    pub fn list_folder(&self, folder: &str, identity: &str, flags: i32) -> String {
        let mut out = String::new();
        let prefix = format!("{folder}/");
        let mut subs: Vec<FolderRecord> = self
            .folders
            .iter()
            .filter(|e| {
                e.key().strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|e| e.value().clone())
            .collect();
        subs.sort_by(|a, b| a.name.cmp(&b.name));
        for sub in subs {
            out.push_str(&render_folder_row(&sub, flags));
        }

        let mut files: Vec<FileRecord> = self
            .files
            .iter()
            .filter(|e| e.value().folder == folder)
            .filter(|e| visible(e.value(), identity, flags))
            .map(|e| e.value().clone())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        for file in files {
            out.push_str(&render_file_row(&file, flags));
        }
        out
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.files.len()
    }
}

fn visible(record: &FileRecord, identity: &str, flags: i32) -> bool {
    flags & VIEW_FLAG_ALL != 0 || record.permits(identity, Permission::Read)
}

fn render_file_row(record: &FileRecord, flags: i32) -> String {
    if flags & VIEW_FLAG_LONG != 0 {
        format!(
            "| F | {:<10} | {:>5} | {:>5} | {:>16} | {:<5} |\n",
            record.name,
            record.word_count,
            record.char_count,
            format_timestamp(record.last_accessed),
            record.owner
        )
    } else {
        format!("--> {}\n", record.name)
    }
}

fn render_folder_row(folder: &FolderRecord, flags: i32) -> String {
    if flags & VIEW_FLAG_LONG != 0 {
        format!(
            "| D | {:<10} | {:>5} | {:>5} | {:>16} | {:<5} |\n",
            folder.name, "-", "-", "-", folder.owner
        )
    } else {
        format!("[D] {}\n", folder.name)
    }
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
