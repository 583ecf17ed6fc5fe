//! Node registry: slotted table plus one connection actor per Node.
//!
//! Each registered Node keeps one persistent control socket. A single actor
//! task owns that socket and drains a queue of work items; callers that
//! expect a reply receive it over a oneshot channel. Serialising the socket
//! behind a queue (instead of a mutex around the fd) makes it impossible
//! for a request to be written while another request's reply is mid-read.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::frames::{Component, FrameHeader, MsgType, read_frame, send_frame};
use crate::protocol::status::StoreError;
use crate::protocol::types::NodeAddr;

pub const MAX_NODES: usize = 16;
const ACTOR_QUEUE_DEPTH: usize = 32;

/// One queued request for a Node's control connection.
pub struct NodeRequest {
    pub msg_type: MsgType,
    pub name: String,
    pub payload: Vec<u8>,
    /// Present when the Directory expects a reply frame.
    pub reply: Option<oneshot::Sender<Result<(FrameHeader, Vec<u8>)>>>,
}

#[derive(Clone)]
struct Slot {
    addr: NodeAddr,
    tx: mpsc::Sender<NodeRequest>,
}

pub struct NodeRegistry {
    slots: Mutex<Vec<Option<Slot>>>,
    cursor: AtomicUsize,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; MAX_NODES]),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Allocates the lowest free slot for a registering Node and returns it
    /// together with the work-queue receiver its actor must drain.
    /// Duplicate registration by an active `(ip, port)` is rejected.
    pub fn register(&self, addr: NodeAddr) -> Result<(usize, mpsc::Receiver<NodeRequest>), StoreError> {
        let mut slots = self.slots.lock().unwrap();
        let duplicate = slots.iter().flatten().any(|s| s.addr == addr);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "A node at {addr} is already registered"
            )));
        }
        let Some(free) = slots.iter().position(|s| s.is_none()) else {
            return Err(StoreError::Internal(
                "No free slots in the node registry".to_string(),
            ));
        };
        let (tx, rx) = mpsc::channel(ACTOR_QUEUE_DEPTH);
        slots[free] = Some(Slot { addr, tx });
        Ok((free, rx))
    }

    /// Deactivates a slot; the actor sees its queue close and exits.
    pub fn deactivate(&self, slot: usize) -> bool {
        let mut slots = self.slots.lock().unwrap();
        if let Some(entry) = slots.get_mut(slot)
            && entry.is_some()
        {
            *entry = None;
            return true;
        }
        false
    }

    pub fn addr_of(&self, slot: usize) -> Option<NodeAddr> {
        self.slots
            .lock()
            .unwrap()
            .get(slot)
            .and_then(|s| s.as_ref())
            .map(|s| s.addr.clone())
    }

    pub fn slot_by_addr(&self, addr: &NodeAddr) -> Option<usize> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| &s.addr == addr))
    }

    fn sender(&self, slot: usize) -> Option<mpsc::Sender<NodeRequest>> {
        self.slots
            .lock()
            .unwrap()
            .get(slot)
            .and_then(|s| s.as_ref())
            .map(|s| s.tx.clone())
    }

    pub fn active_count(&self) -> usize {
        self.slots.lock().unwrap().iter().flatten().count()
    }

    /// Round-robin placement for a new file, starting from a rolling cursor.
    pub fn pick_for_new_file(&self) -> Option<usize> {
        let slots = self.slots.lock().unwrap();
        let start = self.cursor.load(Ordering::Relaxed);
        for i in 0..MAX_NODES {
            let slot = (start + i) % MAX_NODES;
            if slots[slot].is_some() {
                self.cursor.store((slot + 1) % MAX_NODES, Ordering::Relaxed);
                return Some(slot);
            }
        }
        None
    }

    /// Queues a request on the slot's actor and, when `expect_reply`, awaits
    /// the response frame. Any failure means the control link is unusable;
    /// the caller is responsible for purging the slot.
    pub async fn dispatch(
        &self,
        slot: usize,
        msg_type: MsgType,
        name: &str,
        payload: Vec<u8>,
        expect_reply: bool,
    ) -> Result<Option<(FrameHeader, Vec<u8>)>> {
        let tx = self
            .sender(slot)
            .with_context(|| format!("node slot {slot} is not active"))?;

        if expect_reply {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(NodeRequest {
                msg_type,
                name: name.to_string(),
                payload,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| anyhow!("node actor for slot {slot} is gone"))?;
            let reply = reply_rx
                .await
                .map_err(|_| anyhow!("node actor for slot {slot} dropped the request"))??;
            Ok(Some(reply))
        } else {
            tx.send(NodeRequest {
                msg_type,
                name: name.to_string(),
                payload,
                reply: None,
            })
            .await
            .map_err(|_| anyhow!("node actor for slot {slot} is gone"))?;
            Ok(None)
        }
    }
}

/// Owns one Node's control socket. Runs after the registration sync phase
/// and drains queued requests until the queue closes or the socket fails.
/// Returns `true` when it stopped because the socket failed (the caller
/// should purge the slot) and `false` when the slot was deactivated.
pub async fn run_connection_actor(
    mut stream: TcpStream,
    mut rx: mpsc::Receiver<NodeRequest>,
    slot: usize,
) -> bool {
    let mut socket_failed = false;
    while let Some(request) = rx.recv().await {
        let header = FrameHeader::with_name(
            request.msg_type,
            Component::Directory,
            Component::Node,
            &request.name,
        );
        let wrote = send_frame(&mut stream, &header, &request.payload).await;

        match request.reply {
            Some(reply_tx) => {
                let result = match wrote {
                    Ok(()) => read_frame(&mut stream).await,
                    Err(e) => Err(e),
                };
                let failed = result.is_err();
                let _ = reply_tx.send(result);
                if failed {
                    socket_failed = true;
                    break;
                }
            }
            None => {
                if let Err(e) = wrote {
                    tracing::warn!("Node slot {} control write failed: {}", slot, e);
                    socket_failed = true;
                    break;
                }
            }
        }
    }
    // Closing the queue drops any still-pending oneshot senders, which the
    // waiting dispatchers observe as a dead node.
    rx.close();
    tracing::info!("Connection actor for node slot {} stopped", slot);
    socket_failed
}
