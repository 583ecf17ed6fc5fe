//! Per-file access-request log.
//!
//! Requests live in `access_requests/<file>.requests`, one line per request:
//! `ts|requester|perm|status` with `perm` in `{-R, -W}` and `status` in
//! `{PENDING, APPROVED, DENIED}`. At most one PENDING entry may exist per
//! `(file, requester, perm)`; approval and denial rewrite the status in
//! place so the log keeps the full decision history.

use std::fs;

use chrono::DateTime;

use crate::protocol::status::StoreError;
use crate::protocol::types::Permission;

use super::persistence::{NodeStorage, now_secs};

pub const PERM_READ_FLAG: &str = "-R";
pub const PERM_WRITE_FLAG: &str = "-W";

pub fn parse_perm_flag(flag: &str) -> Option<Permission> {
    match flag {
        PERM_READ_FLAG => Some(Permission::Read),
        PERM_WRITE_FLAG => Some(Permission::Write),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct RequestEntry {
    ts: i64,
    requester: String,
    perm: String,
    status: String,
}

impl RequestEntry {
    fn serialize(&self) -> String {
        format!("{}|{}|{}|{}", self.ts, self.requester, self.perm, self.status)
    }

    fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 4 {
            return None;
        }
        Some(Self {
            ts: parts[0].parse().ok()?,
            requester: parts[1].to_string(),
            perm: parts[2].to_string(),
            status: parts[3].to_string(),
        })
    }
}

fn requests_path(store: &NodeStorage, file: &str) -> std::path::PathBuf {
    store.requests_dir().join(format!("{file}.requests"))
}

fn read_entries(store: &NodeStorage, file: &str) -> Vec<RequestEntry> {
    let Ok(raw) = fs::read_to_string(requests_path(store, file)) else {
        return Vec::new();
    };
    raw.lines().filter_map(RequestEntry::parse).collect()
}

fn write_entries(store: &NodeStorage, file: &str, entries: &[RequestEntry]) -> Result<(), StoreError> {
    let mut body: String = entries
        .iter()
        .map(|e| e.serialize())
        .collect::<Vec<_>>()
        .join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(requests_path(store, file), body)
        .map_err(|e| StoreError::Internal(format!("Failed to update access requests: {e}")))
}

fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Appends a PENDING request. Duplicate pending requests for the same
/// `(requester, perm)` are rejected.
pub fn submit(
    store: &NodeStorage,
    file: &str,
    requester: &str,
    perm_flag: &str,
) -> Result<(), StoreError> {
    let mut entries = read_entries(store, file);
    let duplicate = entries
        .iter()
        .any(|e| e.requester == requester && e.perm == perm_flag && e.status == "PENDING");
    if duplicate {
        return Err(StoreError::Conflict(
            "Access request already exists".to_string(),
        ));
    }
    entries.push(RequestEntry {
        ts: now_secs(),
        requester: requester.to_string(),
        perm: perm_flag.to_string(),
        status: "PENDING".to_string(),
    });
    write_entries(store, file, &entries)?;
    tracing::info!(
        "Access request: {} wants {} on '{}'",
        requester,
        perm_flag,
        file
    );
    Ok(())
}

fn render_pending(out: &mut String, entries: &[RequestEntry]) -> usize {
    let mut count = 0;
    for entry in entries.iter().filter(|e| e.status == "PENDING") {
        out.push_str(&format!(
            "  User: {} | Permission: {} | Requested: {}\n",
            entry.requester,
            entry.perm,
            format_timestamp(entry.ts)
        ));
        count += 1;
    }
    count
}

/// Lists pending requests for one file.
pub fn list_for_file(store: &NodeStorage, file: &str) -> String {
    let entries = read_entries(store, file);
    let mut out = format!("Access requests for file: {file}\n");
    let count = render_pending(&mut out, &entries);
    if count == 0 {
        out.push_str("No pending access requests found.\n");
    } else {
        out.push_str(&format!("\nTotal pending requests: {count}\n"));
    }
    out
}

/// Lists pending requests across every file the caller owns.
pub fn list_for_owner(store: &NodeStorage, owner: &str) -> String {
    let mut out = "All pending access requests for your files:\n".to_string();
    let mut total = 0;
    for file in store.owned_files(owner) {
        let entries = read_entries(store, &file);
        if entries.iter().any(|e| e.status == "PENDING") {
            out.push_str(&format!("\nFile: {file}\n"));
            total += render_pending(&mut out, &entries);
        }
    }
    if total == 0 {
        out.push_str("No pending access requests found.\n");
    } else {
        out.push_str(&format!("\nTotal pending requests: {total}\n"));
    }
    out
}

/// Marks the matching pending request APPROVED and persists the grant into
/// the file's ACL.
pub fn approve(
    store: &NodeStorage,
    file: &str,
    requester: &str,
    perm_flag: &str,
) -> Result<(), StoreError> {
    let permission = parse_perm_flag(perm_flag)
        .ok_or_else(|| StoreError::BadRequest("Invalid permission flag".to_string()))?;
    let mut entries = read_entries(store, file);
    let target = entries
        .iter_mut()
        .find(|e| e.requester == requester && e.perm == perm_flag && e.status == "PENDING");
    let Some(target) = target else {
        return Err(StoreError::NotFound(
            "Access request not found".to_string(),
        ));
    };
    target.status = "APPROVED".to_string();
    write_entries(store, file, &entries)?;
    store.set_acl(file, requester, permission);
    tracing::info!("Approved {} for {} on '{}'", perm_flag, requester, file);
    Ok(())
}

/// Marks the matching pending request DENIED. The ACL is untouched.
pub fn deny(store: &NodeStorage, file: &str, requester: &str) -> Result<(), StoreError> {
    let mut entries = read_entries(store, file);
    let target = entries
        .iter_mut()
        .find(|e| e.requester == requester && e.status == "PENDING");
    let Some(target) = target else {
        return Err(StoreError::NotFound(
            "Access request not found".to_string(),
        ));
    };
    target.status = "DENIED".to_string();
    write_entries(store, file, &entries)?;
    tracing::info!("Denied access request from {} on '{}'", requester, file);
    Ok(())
}

/// Whether the requester already holds a permission at least as strong as
/// the one being requested.
pub fn already_granted(store: &NodeStorage, file: &str, requester: &str, perm_flag: &str) -> bool {
    let Some(needed) = parse_perm_flag(perm_flag) else {
        return false;
    };
    store
        .files
        .get(file)
        .map(|meta| {
            meta.acl
                .iter()
                .any(|e| e.identity == requester && e.permission.allows(needed))
        })
        .unwrap_or(false)
}
