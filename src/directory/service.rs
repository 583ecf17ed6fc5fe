//! Directory runtime: shared state, the listener, and the session loops.
//!
//! Every accepted connection gets its own task. The first frame identifies
//! the peer: Nodes register and hand their socket to a connection actor,
//! Clients authenticate and enter the framed command loop.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::frames::{Component, FrameHeader, MsgType, read_frame, send_frame};
use crate::protocol::status::StoreError;
use crate::protocol::types::{FileRecordWire, NodeAddr, Permission};

use super::cache::LocationCache;
use super::handlers::{self, Reply};
use super::index::FileIndex;
use super::registry::{NodeRegistry, run_connection_actor};
use super::users::ActiveUsers;

/// Everything the Directory's session tasks share.
pub struct DirectoryState {
    pub index: FileIndex,
    pub cache: LocationCache,
    pub registry: NodeRegistry,
    pub users: ActiveUsers,
    pub allow_exec: bool,
}

impl DirectoryState {
    pub fn new(allow_exec: bool) -> Arc<Self> {
        Arc::new(Self {
            index: FileIndex::new(),
            cache: LocationCache::new(),
            registry: NodeRegistry::new(),
            users: ActiveUsers::new(),
            allow_exec,
        })
    }

    /// Cache-first location lookup; a miss walks the index and populates
    /// the cache.
    pub fn locate(&self, name: &str) -> Option<usize> {
        if let Some(slot) = self.cache.lookup(name) {
            return Some(slot);
        }
        let slot = self.index.locate(name)?;
        self.cache.insert(name, slot);
        Some(slot)
    }

    /// Deactivates a Node slot and purges everything it owned.
    pub fn remove_node(&self, slot: usize) {
        if self.registry.deactivate(slot) {
            let purged = self.index.purge_slot(slot);
            for name in &purged {
                self.cache.invalidate(name);
            }
            self.cache.invalidate_slot(slot);
            tracing::warn!(
                "Node slot {} removed; purged {} file record(s)",
                slot,
                purged.len()
            );
        }
    }

    /// Request/response over a Node's control actor. Any transport failure
    /// removes the Node and purges its files before reporting the error.
    pub async fn node_request(
        &self,
        slot: usize,
        msg_type: MsgType,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<(FrameHeader, Vec<u8>), StoreError> {
        match self
            .registry
            .dispatch(slot, msg_type, name, payload, true)
            .await
        {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(StoreError::Internal(
                "Storage server returned no reply".to_string(),
            )),
            Err(e) => {
                tracing::error!("Control link to slot {} failed: {}", slot, e);
                self.remove_node(slot);
                Err(StoreError::Internal(
                    "Storage server is unreachable".to_string(),
                ))
            }
        }
    }

    /// Fire-and-forget message to a Node (no reply expected).
    pub async fn node_send(
        &self,
        slot: usize,
        msg_type: MsgType,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        match self
            .registry
            .dispatch(slot, msg_type, name, payload, false)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!("Control link to slot {} failed: {}", slot, e);
                self.remove_node(slot);
                Err(StoreError::Internal(
                    "Storage server is unreachable".to_string(),
                ))
            }
        }
    }
}

/// Accept loop. Runs until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<DirectoryState>) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", addr);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("Connection from {} ended: {}", addr, e);
            }
        });
    }
}

/// Reads the first frame and routes by source component.
async fn handle_connection(mut stream: TcpStream, state: Arc<DirectoryState>) -> Result<()> {
    let (header, payload) = read_frame(&mut stream).await?;
    match header.source {
        Component::Node => run_node_session(stream, state, header, payload).await,
        Component::Client => run_client_session(stream, state, header).await,
        Component::Directory => {
            tracing::warn!("Connection claiming to be a Directory; dropping");
            Ok(())
        }
    }
}

async fn send_reply(stream: &mut TcpStream, msg_type: MsgType, payload: &[u8]) -> Result<()> {
    send_frame(
        stream,
        &FrameHeader::new(msg_type, Component::Directory, Component::Client),
        payload,
    )
    .await
}

async fn send_error(stream: &mut TcpStream, err: &StoreError) -> Result<()> {
    tracing::debug!("Replying {}: {}", err.text_code(), err.message());
    send_frame(
        stream,
        &FrameHeader::with_name(
            MsgType::Error,
            Component::Directory,
            Component::Client,
            err.message(),
        ),
        &[],
    )
    .await
}

// --- Node registration ---

async fn run_node_session(
    mut stream: TcpStream,
    state: Arc<DirectoryState>,
    header: FrameHeader,
    payload: Vec<u8>,
) -> Result<()> {
    if header.msg_type != MsgType::Register {
        tracing::warn!(
            "Node connection opened with {:?} instead of REGISTER; closing",
            header.msg_type
        );
        return Ok(());
    }
    let addr = match NodeAddr::decode(&payload) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!("Bad REGISTER payload: {}", e);
            return Ok(());
        }
    };

    let (slot, rx) = match state.registry.register(addr.clone()) {
        Ok(registered) => registered,
        Err(e) => {
            tracing::warn!("Registration from {} rejected: {}", addr, e.message());
            let _ = send_frame(
                &mut stream,
                &FrameHeader::with_name(
                    MsgType::Error,
                    Component::Directory,
                    Component::Node,
                    e.message(),
                ),
                &[],
            )
            .await;
            return Ok(());
        }
    };
    tracing::info!("Node {} registered on slot {}", addr, slot);

    send_frame(
        &mut stream,
        &FrameHeader::new(MsgType::Ack, Component::Directory, Component::Node),
        &[],
    )
    .await?;

    // Sync phase: absorb the Node's file list until REGISTER_COMPLETE.
    let mut synced = 0usize;
    loop {
        let (frame, frame_payload) = match read_frame(&mut stream).await {
            Ok(read) => read,
            Err(e) => {
                tracing::warn!("Node slot {} disconnected during sync: {}", slot, e);
                state.remove_node(slot);
                return Ok(());
            }
        };
        match frame.msg_type {
            MsgType::RegisterFile => match FileRecordWire::decode(&frame_payload) {
                Ok(wire) => {
                    state.cache.invalidate(&wire.name);
                    state.index.rebuild(slot, &wire);
                    synced += 1;
                }
                Err(e) => {
                    tracing::warn!("Bad REGISTER_FILE from slot {}: {}", slot, e);
                    state.remove_node(slot);
                    return Ok(());
                }
            },
            MsgType::RegisterComplete => break,
            other => {
                tracing::warn!("Unexpected {:?} from slot {} during sync", other, slot);
                state.remove_node(slot);
                return Ok(());
            }
        }
    }
    tracing::info!("Node slot {} synced {} file record(s)", slot, synced);

    // The registration task becomes the slot's connection actor.
    let socket_failed = run_connection_actor(stream, rx, slot).await;

    // On a socket failure, purge the slot if this node still owns it. A
    // clean stop means the slot was already deactivated (and possibly
    // reused by a re-registration), so it must be left alone.
    if socket_failed && state.registry.addr_of(slot).as_ref() == Some(&addr) {
        state.remove_node(slot);
    }
    Ok(())
}

// --- Client sessions ---

async fn run_client_session(
    mut stream: TcpStream,
    state: Arc<DirectoryState>,
    header: FrameHeader,
) -> Result<()> {
    if header.msg_type != MsgType::RegisterClient || header.name.trim().is_empty() {
        let err = StoreError::BadRequest("Must register an identity first".to_string());
        let _ = send_error(&mut stream, &err).await;
        return Ok(());
    }
    let username = header.name.trim().to_string();
    send_reply(&mut stream, MsgType::Ack, &[]).await?;
    state.users.register(&username);
    tracing::info!("Client '{}' registered", username);

    let result = client_loop(&mut stream, &state, &username).await;
    state.users.deregister(&username);
    result
}

async fn client_loop(
    stream: &mut TcpStream,
    state: &Arc<DirectoryState>,
    username: &str,
) -> Result<()> {
    loop {
        let (header, payload) = match read_frame(stream).await {
            Ok(frame) => frame,
            Err(_) => {
                tracing::info!("Client '{}' disconnected", username);
                return Ok(());
            }
        };
        let name = header.name.trim().to_string();
        tracing::debug!("[{}] {:?} '{}'", username, header.msg_type, name);

        // EXEC streams raw output and then closes the connection; the
        // client must reconnect and re-authenticate.
        if header.msg_type == MsgType::Exec {
            match handlers::handle_exec(state, username, &name).await {
                Ok(output) => {
                    stream.write_all(&output).await?;
                    stream.flush().await?;
                }
                Err(e) => {
                    let _ = send_error(stream, &e).await;
                }
            }
            return Ok(());
        }

        let outcome: Result<Reply, StoreError> = match header.msg_type {
            MsgType::Create => handlers::handle_create(state, username, &name).await,
            MsgType::Delete => handlers::handle_delete(state, username, &name).await,
            MsgType::Undo => handlers::handle_undo(state, username, &name).await,
            MsgType::Read | MsgType::Stream | MsgType::ViewCheckpoint | MsgType::ListCheckpoints => {
                handlers::handle_redirect(state, username, &name, Permission::Read)
            }
            MsgType::Write | MsgType::Checkpoint | MsgType::Revert => {
                handlers::handle_redirect(state, username, &name, Permission::Write)
            }
            MsgType::LocateFile => handlers::handle_locate(state, &name),
            MsgType::Info => handlers::handle_info(state, username, &name).await,
            MsgType::List => Ok(handlers::handle_list(state)),
            MsgType::View => handlers::handle_view(state, username, &payload).await,
            MsgType::ViewFolder => handlers::handle_view_folder(state, username, &payload).await,
            MsgType::CreateFolder => handlers::handle_create_folder(state, username, &name),
            MsgType::MoveFile => handlers::handle_move_file(state, username, &name, &payload).await,
            MsgType::MoveFolder => {
                handlers::handle_move_folder(state, username, &name, &payload).await
            }
            MsgType::AddAccess => {
                handlers::handle_add_access(state, username, &name, &payload).await
            }
            MsgType::RemAccess => {
                handlers::handle_rem_access(state, username, &name, &payload).await
            }
            MsgType::DeadNodeReport => handlers::handle_dead_report(state, &payload),
            other => {
                tracing::warn!("Client '{}' sent unexpected {:?}", username, other);
                Err(StoreError::BadRequest("Unknown command".to_string()))
            }
        };

        match outcome {
            Ok(reply) => send_reply(stream, reply.msg_type, &reply.payload).await?,
            Err(e) => send_error(stream, &e).await?,
        }
    }
}
