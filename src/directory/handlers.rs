//! Per-command handlers for Client sessions.
//!
//! Each handler validates, consults the index/cache/registry, talks to the
//! owning Node where needed, and produces either a reply frame or a
//! `StoreError` that the session loop renders as an `ERROR` frame.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::protocol::frames::{FrameHeader, MsgType};
use crate::protocol::status::StoreError;
use crate::protocol::types::{
    AccessGrant, FileStats, NodeAddr, Permission, VIEW_FLAG_LONG, ViewArgs, ViewFolderArgs,
    decode_str_payload, encode_str_payload,
};

use super::exec;
use super::service::DirectoryState;

/// A reply frame to send back to the client.
pub struct Reply {
    pub msg_type: MsgType,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn ack() -> Self {
        Self {
            msg_type: MsgType::Ack,
            payload: Vec::new(),
        }
    }

    fn with_payload(msg_type: MsgType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }
}

fn expect_ack(reply: (FrameHeader, Vec<u8>), fallback: &str) -> Result<(), StoreError> {
    if reply.0.msg_type == MsgType::Ack {
        return Ok(());
    }
    let message = if reply.0.name.is_empty() {
        fallback.to_string()
    } else {
        reply.0.name
    };
    Err(StoreError::Internal(message))
}

fn require_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::BadRequest("Missing file name".to_string()));
    }
    Ok(())
}

/// Resolves a file to its owning Node's public address.
fn resolve_node(state: &DirectoryState, name: &str) -> Result<(usize, NodeAddr), StoreError> {
    let slot = state
        .locate(name)
        .ok_or_else(|| StoreError::NotFound("File not found".to_string()))?;
    let addr = state
        .registry
        .addr_of(slot)
        .ok_or_else(|| StoreError::NotFound("File is on an inactive server".to_string()))?;
    Ok((slot, addr))
}

// --- proxy commands ---

pub async fn handle_create(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
) -> Result<Reply, StoreError> {
    require_name(name)?;
    if state.index.locate(name).is_some() {
        return Err(StoreError::Conflict("File already exists".to_string()));
    }
    let slot = state.registry.pick_for_new_file().ok_or_else(|| {
        StoreError::Internal("No active storage servers available".to_string())
    })?;

    let reply = state
        .node_request(slot, MsgType::Create, name, Vec::new())
        .await?;
    expect_ack(reply, "Storage server failed to create the file")?;

    state.index.insert(name, slot, username)?;
    // Persist the owner on the Node; fire-and-forget by design.
    state
        .node_send(slot, MsgType::InternalSetOwner, name, encode_str_payload(username))
        .await?;
    tracing::info!("Created '{}' on slot {} for {}", name, slot, username);
    Ok(Reply::ack())
}

pub async fn handle_delete(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
) -> Result<Reply, StoreError> {
    require_name(name)?;
    let slot = state.index.remove(name, username)?;
    state.cache.invalidate(name);

    // The Directory is the source of truth for existence: the in-memory
    // deletion stands even if the Node refuses or is unreachable.
    match state.node_request(slot, MsgType::Delete, name, Vec::new()).await {
        Ok(reply) => {
            if let Err(e) = expect_ack(reply, "delete refused") {
                tracing::warn!("Node kept '{}' after delete: {}", name, e.message());
            }
        }
        Err(e) => {
            tracing::warn!("Could not reach node for delete of '{}': {}", name, e.message());
        }
    }
    tracing::info!("Deleted '{}' for {}", name, username);
    Ok(Reply::ack())
}

pub async fn handle_undo(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
) -> Result<Reply, StoreError> {
    require_name(name)?;
    if !state.index.check(name, username, Permission::Write) {
        return Err(StoreError::Unauthorized(
            "Access Denied (Write Permission Required)".to_string(),
        ));
    }
    let (slot, _) = resolve_node(state, name)?;
    let reply = state
        .node_request(slot, MsgType::Undo, name, Vec::new())
        .await?;
    expect_ack(reply, "Storage server failed to perform undo")?;
    Ok(Reply::ack())
}

// --- redirects ---

pub fn handle_redirect(
    state: &DirectoryState,
    username: &str,
    name: &str,
    needed: Permission,
) -> Result<Reply, StoreError> {
    require_name(name)?;
    if !state.index.check(name, username, needed) {
        let msg = match needed {
            Permission::Write => "Access Denied (Write Permission Required)",
            _ => "Access Denied (Read Permission Required)",
        };
        return Err(StoreError::Unauthorized(msg.to_string()));
    }
    let (_, addr) = resolve_node(state, name)?;
    Ok(Reply::with_payload(MsgType::ReadRedirect, addr.encode()))
}

/// LOCATE_FILE deliberately skips the permission check so a user can find
/// the Node holding a file in order to submit an access request there.
pub fn handle_locate(state: &DirectoryState, name: &str) -> Result<Reply, StoreError> {
    require_name(name)?;
    let slot = state.locate(name).ok_or_else(|| {
        StoreError::NotFound("File not found in any storage server".to_string())
    })?;
    let addr = state
        .registry
        .addr_of(slot)
        .ok_or_else(|| StoreError::NotFound("File is on an inactive server".to_string()))?;
    Ok(Reply::with_payload(MsgType::LocateResponse, addr.encode()))
}

// --- metadata & listings ---

pub async fn handle_info(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
) -> Result<Reply, StoreError> {
    require_name(name)?;
    if !state.index.check(name, username, Permission::Read) {
        return Err(StoreError::Unauthorized(
            "Access Denied (Read Permission Required)".to_string(),
        ));
    }
    let (slot, addr) = resolve_node(state, name)?;

    let (header, payload) = state
        .node_request(slot, MsgType::InternalGetMetadata, name, Vec::new())
        .await?;
    if header.msg_type == MsgType::InternalMetadataResp
        && let Ok(stats) = FileStats::decode(&payload)
    {
        state.index.update_stats(name, &stats);
    }

    let record = state
        .index
        .details(name)
        .ok_or_else(|| StoreError::NotFound("File not found".to_string()))?;
    let info = record.to_info(&addr.ip, addr.port);
    Ok(Reply::with_payload(MsgType::InfoResponse, info.encode()))
}

pub fn handle_list(state: &DirectoryState) -> Reply {
    Reply::with_payload(
        MsgType::ListResponse,
        state.users.render_list().into_bytes(),
    )
}

pub async fn handle_view(
    state: &Arc<DirectoryState>,
    username: &str,
    payload: &[u8],
) -> Result<Reply, StoreError> {
    let args = ViewArgs::decode(payload)
        .map_err(|_| StoreError::BadRequest("Bad payload for VIEW".to_string()))?;
    if args.flags & VIEW_FLAG_LONG != 0 {
        refresh_stats(state, None).await;
    }
    let listing = state.index.list_top(username, args.flags);
    Ok(Reply::with_payload(MsgType::ViewResponse, listing.into_bytes()))
}

pub async fn handle_view_folder(
    state: &Arc<DirectoryState>,
    username: &str,
    payload: &[u8],
) -> Result<Reply, StoreError> {
    let args = ViewFolderArgs::decode(payload)
        .map_err(|_| StoreError::BadRequest("Bad payload for VIEWFOLDER".to_string()))?;
    if args.flags & VIEW_FLAG_LONG != 0 {
        refresh_stats(state, Some(&args.folder)).await;
    }
    let listing = state.index.list_folder(&args.folder, username, args.flags);
    Ok(Reply::with_payload(MsgType::ViewResponse, listing.into_bytes()))
}

/// Refreshes cached statistics from the owning Nodes, batched per Node and
/// issued concurrently across Nodes.
async fn refresh_stats(state: &Arc<DirectoryState>, folder: Option<&str>) {
    let mut by_slot: HashMap<usize, Vec<String>> = HashMap::new();
    for (name, slot) in state.index.refresh_targets(folder) {
        by_slot.entry(slot).or_default().push(name);
    }

    let mut batches = JoinSet::new();
    for (slot, names) in by_slot {
        let state = state.clone();
        batches.spawn(async move {
            for name in names {
                match state
                    .node_request(slot, MsgType::InternalGetMetadata, &name, Vec::new())
                    .await
                {
                    Ok((header, payload)) => {
                        if header.msg_type == MsgType::InternalMetadataResp
                            && let Ok(stats) = FileStats::decode(&payload)
                        {
                            state.index.update_stats(&name, &stats);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Metadata refresh for slot {} stopped: {}",
                            slot,
                            e.message()
                        );
                        break;
                    }
                }
            }
        });
    }
    while batches.join_next().await.is_some() {}
}

// --- access control ---

pub async fn handle_add_access(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
    payload: &[u8],
) -> Result<Reply, StoreError> {
    require_name(name)?;
    let grant = AccessGrant::decode(payload)
        .map_err(|_| StoreError::BadRequest("Bad payload for ADD_ACCESS".to_string()))?;
    state
        .index
        .grant(name, username, &grant.identity, grant.permission)?;

    let (slot, _) = resolve_node(state, name)?;
    let reply = state
        .node_request(slot, MsgType::InternalAddAccess, name, grant.encode())
        .await?;
    expect_ack(reply, "Storage server failed to update ACL")?;
    Ok(Reply::ack())
}

pub async fn handle_rem_access(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
    payload: &[u8],
) -> Result<Reply, StoreError> {
    require_name(name)?;
    let target = decode_str_payload(payload);
    if target.is_empty() {
        return Err(StoreError::BadRequest(
            "Bad payload for REM_ACCESS".to_string(),
        ));
    }
    state.index.revoke(name, username, &target)?;

    let (slot, _) = resolve_node(state, name)?;
    let reply = state
        .node_request(slot, MsgType::InternalRemAccess, name, encode_str_payload(&target))
        .await?;
    expect_ack(reply, "Storage server failed to update ACL")?;
    Ok(Reply::ack())
}

// --- folders ---

pub fn handle_create_folder(
    state: &DirectoryState,
    username: &str,
    name: &str,
) -> Result<Reply, StoreError> {
    require_name(name)?;
    state.index.add_folder(name, username)?;
    Ok(Reply::ack())
}

pub async fn handle_move_file(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
    payload: &[u8],
) -> Result<Reply, StoreError> {
    require_name(name)?;
    let folder = decode_str_payload(payload);
    let slot = state.index.set_file_folder(name, &folder, username)?;

    let reply = state
        .node_request(slot, MsgType::InternalSetFolder, name, encode_str_payload(&folder))
        .await?;
    expect_ack(reply, "Storage server failed to update folder")?;
    Ok(Reply::ack())
}

pub async fn handle_move_folder(
    state: &Arc<DirectoryState>,
    username: &str,
    src: &str,
    payload: &[u8],
) -> Result<Reply, StoreError> {
    require_name(src)?;
    let dst = decode_str_payload(payload);
    if dst.is_empty() {
        return Err(StoreError::BadRequest(
            "Bad payload for MOVEFOLDER".to_string(),
        ));
    }
    let updates = state.index.move_folder(src, &dst, username)?;

    // Partial propagation failures are logged, not rolled back.
    for update in &updates {
        let pushed = state
            .node_request(
                update.slot,
                MsgType::InternalSetFolder,
                &update.file,
                encode_str_payload(&update.folder),
            )
            .await
            .and_then(|r| expect_ack(r, "folder update refused"));
        if let Err(e) = pushed {
            tracing::warn!(
                "Folder update for '{}' not applied on slot {}: {}",
                update.file,
                update.slot,
                e.message()
            );
        }
    }
    tracing::info!(
        "Moved folder '{}' -> '{}' ({} file(s) updated)",
        src,
        dst,
        updates.len()
    );
    Ok(Reply::ack())
}

// --- failure reports ---

pub fn handle_dead_report(state: &DirectoryState, payload: &[u8]) -> Result<Reply, StoreError> {
    let addr = NodeAddr::decode(payload)
        .map_err(|_| StoreError::BadRequest("Bad payload for SS_DEAD_REPORT".to_string()))?;
    match state.registry.slot_by_addr(&addr) {
        Some(slot) => {
            tracing::warn!("Client reported dead node at {}; purging slot {}", addr, slot);
            state.remove_node(slot);
        }
        None => {
            tracing::info!("Dead-node report for {} matches no active slot; ignoring", addr);
        }
    }
    Ok(Reply::ack())
}

// --- EXEC ---

/// Fetches the file via the owning Node and executes it locally. Returns
/// the combined output; the session closes the connection afterwards.
pub async fn handle_exec(
    state: &Arc<DirectoryState>,
    username: &str,
    name: &str,
) -> Result<Vec<u8>, StoreError> {
    if !state.allow_exec {
        return Err(StoreError::Unauthorized(
            "EXEC is disabled on this Directory".to_string(),
        ));
    }
    require_name(name)?;
    if !state.index.check(name, username, Permission::Read) {
        return Err(StoreError::Unauthorized(
            "Access Denied (Read Permission Required)".to_string(),
        ));
    }
    let (slot, _) = resolve_node(state, name)?;

    let (header, payload) = state
        .node_request(slot, MsgType::InternalRead, name, Vec::new())
        .await?;
    if header.msg_type != MsgType::InternalData {
        return Err(StoreError::Internal(
            "Did not receive valid file data from the storage server".to_string(),
        ));
    }
    let content = String::from_utf8_lossy(&payload).into_owned();
    exec::run(&content).await
}
