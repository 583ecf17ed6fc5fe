//! Binary frame header and async framed I/O.
//!
//! Every framed message is a fixed 266-byte header followed by
//! `payload_len` opaque bytes. All integers are little-endian; the name
//! field is NUL-padded UTF-8. The header layout is packed explicitly (no
//! struct padding) so it is identical on every platform.

use anyhow::{Context, Result, bail};
use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::{put_fixed_str, take_fixed_str};

pub const NAME_LEN: usize = 256;
pub const HEADER_LEN: usize = 2 + 2 + 2 + 4 + NAME_LEN;

/// Upper bound on a single frame payload. Nothing in the protocol comes
/// close; anything larger is a corrupt or hostile header.
pub const MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Identifies which component a frame originates from or is destined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Component {
    Client = 1,
    Directory = 2,
    Node = 3,
}

impl Component {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Component::Client),
            2 => Some(Component::Directory),
            3 => Some(Component::Node),
            _ => None,
        }
    }
}

/// Every framed message type in the system.
///
/// The discriminants are the on-the-wire `msg_type` values and are stable:
/// re-registering Nodes and long-lived Clients depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    // Node -> Directory registration
    Register = 10,
    Ack = 11,
    // Client -> Directory commands
    Create = 12,
    Read = 14,
    Delete = 16,
    Error = 18,
    ReadRedirect = 21,
    RegisterClient = 23,
    AddAccess = 24,
    RemAccess = 25,
    Exec = 26,
    Write = 27,
    Stream = 28,
    Undo = 29,
    Info = 30,
    InfoResponse = 31,
    List = 32,
    ListResponse = 33,
    View = 34,
    ViewResponse = 35,
    RegisterFile = 36,
    RegisterComplete = 37,
    DeadNodeReport = 38,
    // Folder commands
    CreateFolder = 40,
    MoveFile = 41,
    MoveFolder = 42,
    ViewFolder = 43,
    // Directory <-> Node internal
    InternalRead = 100,
    InternalData = 101,
    InternalGetMetadata = 102,
    InternalMetadataResp = 103,
    InternalAddAccess = 104,
    InternalRemAccess = 105,
    InternalSetOwner = 106,
    InternalSetFolder = 107,
    // Checkpoints
    Checkpoint = 120,
    ViewCheckpoint = 121,
    Revert = 122,
    ListCheckpoints = 123,
    // Location discovery (bypasses permission checks)
    LocateFile = 130,
    LocateResponse = 131,
}

impl MsgType {
    pub fn from_u16(value: u16) -> Option<Self> {
        use MsgType::*;
        Some(match value {
            10 => Register,
            11 => Ack,
            12 => Create,
            14 => Read,
            16 => Delete,
            18 => Error,
            21 => ReadRedirect,
            23 => RegisterClient,
            24 => AddAccess,
            25 => RemAccess,
            26 => Exec,
            27 => Write,
            28 => Stream,
            29 => Undo,
            30 => Info,
            31 => InfoResponse,
            32 => List,
            33 => ListResponse,
            34 => View,
            35 => ViewResponse,
            36 => RegisterFile,
            37 => RegisterComplete,
            38 => DeadNodeReport,
            40 => CreateFolder,
            41 => MoveFile,
            42 => MoveFolder,
            43 => ViewFolder,
            100 => InternalRead,
            101 => InternalData,
            102 => InternalGetMetadata,
            103 => InternalMetadataResp,
            104 => InternalAddAccess,
            105 => InternalRemAccess,
            106 => InternalSetOwner,
            107 => InternalSetFolder,
            120 => Checkpoint,
            121 => ViewCheckpoint,
            122 => Revert,
            123 => ListCheckpoints,
            130 => LocateFile,
            131 => LocateResponse,
            _ => return None,
        })
    }
}

/// The fixed frame header preceding every binary message.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub msg_type: MsgType,
    pub source: Component,
    pub dest: Component,
    pub payload_len: u32,
    /// Filename, identity, or error text depending on the message type.
    pub name: String,
}

impl FrameHeader {
    pub fn new(msg_type: MsgType, source: Component, dest: Component) -> Self {
        Self {
            msg_type,
            source,
            dest,
            payload_len: 0,
            name: String::new(),
        }
    }

    pub fn with_name(msg_type: MsgType, source: Component, dest: Component, name: &str) -> Self {
        Self {
            msg_type,
            source,
            dest,
            payload_len: 0,
            name: name.to_string(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.put_u16_le(self.msg_type as u16);
        buf.put_u16_le(self.source as u16);
        buf.put_u16_le(self.dest as u16);
        buf.put_u32_le(self.payload_len);
        put_fixed_str(&mut buf, &self.name, NAME_LEN);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != HEADER_LEN {
            bail!("frame header must be {HEADER_LEN} bytes, got {}", raw.len());
        }
        let mut buf = raw;
        let raw_type = buf.get_u16_le();
        let raw_source = buf.get_u16_le();
        let raw_dest = buf.get_u16_le();
        let payload_len = buf.get_u32_le();
        let name = take_fixed_str(&mut buf, NAME_LEN);

        let msg_type =
            MsgType::from_u16(raw_type).with_context(|| format!("unknown msg_type {raw_type}"))?;
        let source = Component::from_u16(raw_source)
            .with_context(|| format!("unknown source component {raw_source}"))?;
        let dest = Component::from_u16(raw_dest)
            .with_context(|| format!("unknown dest component {raw_dest}"))?;

        Ok(Self {
            msg_type,
            source,
            dest,
            payload_len,
            name,
        })
    }
}

/// Writes one frame: header (with `payload_len` taken from `payload`) and
/// the payload bytes.
pub async fn send_frame<W>(writer: &mut W, header: &FrameHeader, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = header.clone();
    header.payload_len = payload.len() as u32;
    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads one complete frame: header plus payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<(FrameHeader, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await.context("peer closed")?;
    let header = FrameHeader::decode(&raw)?;

    if header.payload_len > MAX_PAYLOAD {
        bail!("frame payload of {} bytes exceeds limit", header.payload_len);
    }
    let mut payload = vec![0u8; header.payload_len as usize];
    if header.payload_len > 0 {
        reader
            .read_exact(&mut payload)
            .await
            .context("peer closed mid-payload")?;
    }
    Ok((header, payload))
}
