//! Node runtime: shared state, Directory registration, the control-command
//! loop, and the public client listener.

use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::protocol::frames::{Component, FrameHeader, MsgType, read_frame, send_frame};
use crate::protocol::status::StoreError;
use crate::protocol::types::{AccessGrant, NodeAddr, decode_str_payload};

use super::handlers;
use super::history;
use super::locks::LockTable;
use super::persistence::NodeStorage;

/// Everything a Node's worker tasks share.
pub struct NodeState {
    pub store: NodeStorage,
    pub locks: LockTable,
}

impl NodeState {
    pub fn new(store: NodeStorage) -> Self {
        Self {
            store,
            locks: LockTable::new(),
        }
    }
}

/// Accept loop for direct Client connections. One worker task per
/// connection; dropping the returned future aborts in-flight workers, which
/// is how shutdown force-closes open sockets.
pub async fn serve_clients(listener: TcpListener, state: Arc<NodeState>) -> Result<()> {
    let mut workers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                tracing::debug!("Accepted direct client {}", addr);
                let state = state.clone();
                workers.spawn(handlers::handle_client(stream, state));
            }
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
        }
    }
}

/// Registration handshake: announce the public address, wait for the ACK,
/// then stream every persisted file record and terminate the sync phase.
pub async fn register_with_directory(
    stream: &mut TcpStream,
    state: &NodeState,
    public_ip: &str,
    public_port: i32,
) -> Result<()> {
    let addr = NodeAddr {
        ip: public_ip.to_string(),
        port: public_port,
    };
    send_frame(
        stream,
        &FrameHeader::new(MsgType::Register, Component::Node, Component::Directory),
        &addr.encode(),
    )
    .await?;

    let (ack, _) = read_frame(stream).await?;
    if ack.msg_type != MsgType::Ack {
        bail!("Directory refused registration: {}", ack.name);
    }

    let records = state.store.registration_records();
    for record in &records {
        send_frame(
            stream,
            &FrameHeader::with_name(
                MsgType::RegisterFile,
                Component::Node,
                Component::Directory,
                &record.name,
            ),
            &record.encode(),
        )
        .await?;
    }
    send_frame(
        stream,
        &FrameHeader::new(
            MsgType::RegisterComplete,
            Component::Node,
            Component::Directory,
        ),
        &[],
    )
    .await?;
    tracing::info!(
        "Registered with Directory; synced {} file record(s)",
        records.len()
    );
    Ok(())
}

/// Handles framed commands arriving from the Directory on the persistent
/// control link. Returns when the Directory disconnects.
pub async fn control_loop(mut stream: TcpStream, state: Arc<NodeState>) -> Result<()> {
    loop {
        let (header, payload) = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Directory control link closed: {}", e);
                return Ok(());
            }
        };
        handle_control(&mut stream, &state, header, payload).await?;
    }
}

async fn send_ack(stream: &mut TcpStream) -> Result<()> {
    send_frame(
        stream,
        &FrameHeader::new(MsgType::Ack, Component::Node, Component::Directory),
        &[],
    )
    .await
}

async fn send_control_error(stream: &mut TcpStream, message: &str) -> Result<()> {
    send_frame(
        stream,
        &FrameHeader::with_name(
            MsgType::Error,
            Component::Node,
            Component::Directory,
            message,
        ),
        &[],
    )
    .await
}

async fn handle_control(
    stream: &mut TcpStream,
    state: &NodeState,
    header: FrameHeader,
    payload: Vec<u8>,
) -> Result<()> {
    let name = header.name.clone();
    match header.msg_type {
        MsgType::Create => {
            tracing::info!("Directory forwarded CREATE for '{}'", name);
            match state.store.create_file(&name, "") {
                Ok(()) => send_ack(stream).await,
                Err(e) => send_control_error(stream, e.message()).await,
            }
        }
        MsgType::Delete => {
            tracing::info!("Directory forwarded DELETE for '{}'", name);
            match state.store.delete_file(&name) {
                Ok(()) => send_ack(stream).await,
                Err(e) => send_control_error(stream, e.message()).await,
            }
        }
        MsgType::Undo => {
            tracing::info!("Directory forwarded UNDO for '{}'", name);
            if state.locks.file_locked(&name) {
                return send_control_error(stream, "File is currently being edited").await;
            }
            match history::perform_undo(&state.store, &name) {
                Ok(()) => send_ack(stream).await,
                Err(e) => send_control_error(stream, e.message()).await,
            }
        }
        MsgType::InternalGetMetadata => {
            let stats = state.store.stats_of(&name).unwrap_or_default();
            send_frame(
                stream,
                &FrameHeader::with_name(
                    MsgType::InternalMetadataResp,
                    Component::Node,
                    Component::Directory,
                    &name,
                ),
                &stats.encode(),
            )
            .await
        }
        MsgType::InternalRead => {
            let content = match state.store.read_file(&name) {
                Ok(content) => content,
                Err(StoreError::NotFound(_)) => {
                    tracing::warn!("Directory requested '{}' but it is missing", name);
                    String::new()
                }
                Err(e) => {
                    tracing::error!("INTERNAL_READ of '{}' failed: {}", name, e);
                    String::new()
                }
            };
            send_frame(
                stream,
                &FrameHeader::with_name(
                    MsgType::InternalData,
                    Component::Node,
                    Component::Directory,
                    &name,
                ),
                content.as_bytes(),
            )
            .await
        }
        MsgType::InternalAddAccess => match AccessGrant::decode(&payload) {
            Ok(grant) => {
                state.store.set_acl(&name, &grant.identity, grant.permission);
                tracing::info!(
                    "Directory set ACL on '{}': {} -> {:?}",
                    name,
                    grant.identity,
                    grant.permission
                );
                send_ack(stream).await
            }
            Err(e) => send_control_error(stream, &format!("Bad payload: {e}")).await,
        },
        MsgType::InternalRemAccess => {
            let identity = decode_str_payload(&payload);
            state.store.remove_acl(&name, &identity);
            tracing::info!("Directory removed '{}' from ACL of '{}'", identity, name);
            send_ack(stream).await
        }
        MsgType::InternalSetOwner => {
            // Fire-and-forget: the Directory does not wait for a reply.
            let owner = decode_str_payload(&payload);
            state.store.set_owner(&name, &owner);
            tracing::info!("Persisted owner '{}' for '{}'", owner, name);
            Ok(())
        }
        MsgType::InternalSetFolder => {
            let folder = decode_str_payload(&payload);
            state.store.set_folder(&name, &folder);
            tracing::info!("Persisted folder '{}' for '{}'", folder, name);
            send_ack(stream).await
        }
        other => {
            tracing::warn!("Unexpected control message {:?} from Directory", other);
            send_control_error(stream, "Unknown internal command").await
        }
    }
}
