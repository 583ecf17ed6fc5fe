//! In-memory records backing the Directory's file and folder index.

use crate::protocol::types::{
    AclEntry, FileInfoWire, FileRecordWire, FileStats, MAX_ACL_ENTRIES, Permission,
};

/// One file as the Directory sees it. The owning Node holds the
/// authoritative copy; statistics here are cached and refreshed on demand.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    /// Registry slot of the owning Node.
    pub slot: usize,
    pub owner: String,
    /// Empty string means the file sits at the top level.
    pub folder: String,
    pub acl: Vec<AclEntry>,
    pub word_count: i64,
    pub char_count: i64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
}

impl FileRecord {
    pub fn new(name: &str, slot: usize, owner: &str, now: i64) -> Self {
        Self {
            name: name.to_string(),
            slot,
            owner: owner.to_string(),
            folder: String::new(),
            acl: Vec::new(),
            word_count: 0,
            char_count: 0,
            created: now,
            modified: now,
            last_accessed: now,
            last_accessed_by: String::new(),
        }
    }

    /// Rebuilds a record from a Node's registration stream.
    pub fn from_wire(slot: usize, wire: &FileRecordWire) -> Self {
        Self {
            name: wire.name.clone(),
            slot,
            owner: wire.owner.clone(),
            folder: wire.folder.clone(),
            acl: wire.acl.iter().take(MAX_ACL_ENTRIES).cloned().collect(),
            word_count: wire.word_count,
            char_count: wire.char_count,
            created: wire.created,
            modified: wire.modified,
            last_accessed: wire.last_accessed,
            last_accessed_by: wire.last_accessed_by.clone(),
        }
    }

    /// Owner always passes; otherwise some ACL entry for the identity must
    /// carry a permission at least as strong as `needed`.
    pub fn permits(&self, identity: &str, needed: Permission) -> bool {
        if self.owner == identity {
            return true;
        }
        self.acl
            .iter()
            .any(|e| e.identity == identity && e.permission.allows(needed))
    }

    pub fn apply_stats(&mut self, stats: &FileStats) {
        self.word_count = stats.word_count;
        self.char_count = stats.char_count;
        self.modified = stats.modified;
        self.last_accessed = stats.last_accessed;
        self.last_accessed_by = stats.last_accessed_by.clone();
    }

    pub fn to_info(&self, node_ip: &str, node_port: i32) -> FileInfoWire {
        FileInfoWire {
            name: self.name.clone(),
            owner: self.owner.clone(),
            node_ip: node_ip.to_string(),
            node_port,
            acl: self.acl.clone(),
            word_count: self.word_count,
            char_count: self.char_count,
            created: self.created,
            modified: self.modified,
            last_accessed: self.last_accessed,
            last_accessed_by: self.last_accessed_by.clone(),
        }
    }
}

/// A registered folder. Folders are pure Directory metadata; Nodes only see
/// the folder path persisted per file.
#[derive(Debug, Clone)]
pub struct FolderRecord {
    pub name: String,
    pub owner: String,
}

/// A pending folder change to push to one owning Node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMove {
    pub file: String,
    pub folder: String,
    pub slot: usize,
}
