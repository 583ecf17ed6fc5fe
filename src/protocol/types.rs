//! Fixed-width payload records carried inside binary frames.
//!
//! Strings occupy a fixed number of bytes, NUL-padded, and are truncated on
//! encode if longer. Integers are little-endian. Every record documents its
//! exact byte size; `decode` rejects buffers of the wrong length.

use anyhow::{Result, bail};
use bytes::{Buf, BufMut};

pub const IDENT_LEN: usize = 64;
pub const ADDR_LEN: usize = 64;
pub const FILE_NAME_LEN: usize = 256;
pub const MAX_ACL_ENTRIES: usize = 10;

pub const VIEW_FLAG_ALL: i32 = 1;
pub const VIEW_FLAG_LONG: i32 = 2;

/// Writes `s` into exactly `width` bytes, NUL-padded, truncating on a char
/// boundary if necessary.
pub fn put_fixed_str(buf: &mut impl BufMut, s: &str, width: usize) {
    let mut bytes = s.as_bytes();
    if bytes.len() > width {
        let mut cut = width;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        bytes = &s.as_bytes()[..cut];
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
}

/// Reads `width` bytes and returns the string up to the first NUL.
pub fn take_fixed_str(buf: &mut impl Buf, width: usize) -> String {
    let mut raw = vec![0u8; width];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Per-identity access level. `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Permission {
    None = 0,
    Read = 1,
    Write = 2,
}

impl Permission {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Permission::None),
            1 => Some(Permission::Read),
            2 => Some(Permission::Write),
            _ => None,
        }
    }

    /// Whether a holder of `self` may perform an operation needing `needed`.
    pub fn allows(self, needed: Permission) -> bool {
        self >= needed
    }
}

/// One ACL slot: a non-owner identity and its permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub identity: String,
    pub permission: Permission,
}

fn put_acl(buf: &mut impl BufMut, acl: &[AclEntry]) {
    for entry in acl.iter().take(MAX_ACL_ENTRIES) {
        put_fixed_str(buf, &entry.identity, IDENT_LEN);
        buf.put_u32_le(entry.permission as u32);
    }
    for _ in acl.len()..MAX_ACL_ENTRIES {
        buf.put_bytes(0, IDENT_LEN);
        buf.put_u32_le(0);
    }
    buf.put_i32_le(acl.len().min(MAX_ACL_ENTRIES) as i32);
}

fn take_acl(buf: &mut impl Buf) -> Result<Vec<AclEntry>> {
    let mut slots = Vec::with_capacity(MAX_ACL_ENTRIES);
    for _ in 0..MAX_ACL_ENTRIES {
        let identity = take_fixed_str(buf, IDENT_LEN);
        let raw = buf.get_u32_le();
        slots.push((identity, raw));
    }
    let count = buf.get_i32_le();
    if !(0..=MAX_ACL_ENTRIES as i32).contains(&count) {
        bail!("acl count {count} out of range");
    }
    let mut acl = Vec::with_capacity(count as usize);
    for (identity, raw) in slots.into_iter().take(count as usize) {
        let Some(permission) = Permission::from_u32(raw) else {
            bail!("unknown permission {raw}");
        };
        acl.push(AclEntry {
            identity,
            permission,
        });
    }
    Ok(acl)
}

/// A Node's public address as seen by Clients. 68 bytes.
///
/// Carried by `REGISTER`, redirect responses, and `SS_DEAD_REPORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub ip: String,
    pub port: i32,
}

impl NodeAddr {
    pub const WIRE_LEN: usize = ADDR_LEN + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        put_fixed_str(&mut buf, &self.ip, ADDR_LEN);
        buf.put_i32_le(self.port);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::WIRE_LEN {
            bail!("NodeAddr payload must be {} bytes", Self::WIRE_LEN);
        }
        let mut buf = raw;
        let ip = take_fixed_str(&mut buf, ADDR_LEN);
        let port = buf.get_i32_le();
        Ok(Self { ip, port })
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Payload of `ADD_ACCESS` / `INTERNAL_ADD_ACCESS`. 68 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub identity: String,
    pub permission: Permission,
}

impl AccessGrant {
    pub const WIRE_LEN: usize = IDENT_LEN + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        put_fixed_str(&mut buf, &self.identity, IDENT_LEN);
        buf.put_u32_le(self.permission as u32);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::WIRE_LEN {
            bail!("AccessGrant payload must be {} bytes", Self::WIRE_LEN);
        }
        let mut buf = raw;
        let identity = take_fixed_str(&mut buf, IDENT_LEN);
        let raw_perm = buf.get_u32_le();
        let Some(permission) = Permission::from_u32(raw_perm) else {
            bail!("unknown permission {raw_perm}");
        };
        Ok(Self {
            identity,
            permission,
        })
    }
}

/// Payload of `VIEW`: listing flags. 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewArgs {
    pub flags: i32,
}

impl ViewArgs {
    pub const WIRE_LEN: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        buf.put_i32_le(self.flags);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::WIRE_LEN {
            bail!("ViewArgs payload must be {} bytes", Self::WIRE_LEN);
        }
        let mut buf = raw;
        Ok(Self {
            flags: buf.get_i32_le(),
        })
    }
}

/// Payload of `VIEWFOLDER`: flags plus the folder path. 260 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFolderArgs {
    pub flags: i32,
    pub folder: String,
}

impl ViewFolderArgs {
    pub const WIRE_LEN: usize = 4 + FILE_NAME_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        buf.put_i32_le(self.flags);
        put_fixed_str(&mut buf, &self.folder, FILE_NAME_LEN);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::WIRE_LEN {
            bail!("ViewFolderArgs payload must be {} bytes", Self::WIRE_LEN);
        }
        let mut buf = raw;
        let flags = buf.get_i32_le();
        let folder = take_fixed_str(&mut buf, FILE_NAME_LEN);
        Ok(Self { flags, folder })
    }
}

/// Cached per-file statistics, as reported by the owning Node. 104 bytes.
///
/// Payload of `INTERNAL_METADATA_RESP`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStats {
    pub word_count: i64,
    pub char_count: i64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
}

impl FileStats {
    pub const WIRE_LEN: usize = 8 * 5 + IDENT_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        buf.put_i64_le(self.word_count);
        buf.put_i64_le(self.char_count);
        buf.put_i64_le(self.created);
        buf.put_i64_le(self.modified);
        buf.put_i64_le(self.last_accessed);
        put_fixed_str(&mut buf, &self.last_accessed_by, IDENT_LEN);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::WIRE_LEN {
            bail!("FileStats payload must be {} bytes", Self::WIRE_LEN);
        }
        let mut buf = raw;
        Ok(Self {
            word_count: buf.get_i64_le(),
            char_count: buf.get_i64_le(),
            created: buf.get_i64_le(),
            modified: buf.get_i64_le(),
            last_accessed: buf.get_i64_le(),
            last_accessed_by: take_fixed_str(&mut buf, IDENT_LEN),
        })
    }
}

/// A complete file record as streamed during Node registration. 1364 bytes.
///
/// Payload of `REGISTER_FILE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordWire {
    pub name: String,
    pub owner: String,
    pub acl: Vec<AclEntry>,
    pub word_count: i64,
    pub char_count: i64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
    pub folder: String,
}

impl FileRecordWire {
    pub const WIRE_LEN: usize = FILE_NAME_LEN
        + IDENT_LEN
        + MAX_ACL_ENTRIES * (IDENT_LEN + 4)
        + 4
        + 8 * 5
        + IDENT_LEN
        + FILE_NAME_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        put_fixed_str(&mut buf, &self.name, FILE_NAME_LEN);
        put_fixed_str(&mut buf, &self.owner, IDENT_LEN);
        put_acl(&mut buf, &self.acl);
        buf.put_i64_le(self.word_count);
        buf.put_i64_le(self.char_count);
        buf.put_i64_le(self.created);
        buf.put_i64_le(self.modified);
        buf.put_i64_le(self.last_accessed);
        put_fixed_str(&mut buf, &self.last_accessed_by, IDENT_LEN);
        put_fixed_str(&mut buf, &self.folder, FILE_NAME_LEN);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::WIRE_LEN {
            bail!("FileRecordWire payload must be {} bytes", Self::WIRE_LEN);
        }
        let mut buf = raw;
        let name = take_fixed_str(&mut buf, FILE_NAME_LEN);
        let owner = take_fixed_str(&mut buf, IDENT_LEN);
        let acl = take_acl(&mut buf)?;
        Ok(Self {
            name,
            owner,
            acl,
            word_count: buf.get_i64_le(),
            char_count: buf.get_i64_le(),
            created: buf.get_i64_le(),
            modified: buf.get_i64_le(),
            last_accessed: buf.get_i64_le(),
            last_accessed_by: take_fixed_str(&mut buf, IDENT_LEN),
            folder: take_fixed_str(&mut buf, FILE_NAME_LEN),
        })
    }
}

/// The full INFO response: record details plus the owning Node's address.
/// 1176 bytes. Payload of `INFO_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfoWire {
    pub name: String,
    pub owner: String,
    pub node_ip: String,
    pub node_port: i32,
    pub acl: Vec<AclEntry>,
    pub word_count: i64,
    pub char_count: i64,
    pub created: i64,
    pub modified: i64,
    pub last_accessed: i64,
    pub last_accessed_by: String,
}

impl FileInfoWire {
    pub const WIRE_LEN: usize = FILE_NAME_LEN
        + IDENT_LEN
        + ADDR_LEN
        + 4
        + MAX_ACL_ENTRIES * (IDENT_LEN + 4)
        + 4
        + 8 * 5
        + IDENT_LEN;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        put_fixed_str(&mut buf, &self.name, FILE_NAME_LEN);
        put_fixed_str(&mut buf, &self.owner, IDENT_LEN);
        put_fixed_str(&mut buf, &self.node_ip, ADDR_LEN);
        buf.put_i32_le(self.node_port);
        put_acl(&mut buf, &self.acl);
        buf.put_i64_le(self.word_count);
        buf.put_i64_le(self.char_count);
        buf.put_i64_le(self.created);
        buf.put_i64_le(self.modified);
        buf.put_i64_le(self.last_accessed);
        put_fixed_str(&mut buf, &self.last_accessed_by, IDENT_LEN);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != Self::WIRE_LEN {
            bail!("FileInfoWire payload must be {} bytes", Self::WIRE_LEN);
        }
        let mut buf = raw;
        let name = take_fixed_str(&mut buf, FILE_NAME_LEN);
        let owner = take_fixed_str(&mut buf, IDENT_LEN);
        let node_ip = take_fixed_str(&mut buf, ADDR_LEN);
        let node_port = buf.get_i32_le();
        let acl = take_acl(&mut buf)?;
        Ok(Self {
            name,
            owner,
            node_ip,
            node_port,
            acl,
            word_count: buf.get_i64_le(),
            char_count: buf.get_i64_le(),
            created: buf.get_i64_le(),
            modified: buf.get_i64_le(),
            last_accessed: buf.get_i64_le(),
            last_accessed_by: take_fixed_str(&mut buf, IDENT_LEN),
        })
    }
}

/// Encodes a bare identity or folder payload (plain UTF-8 bytes, no padding).
pub fn encode_str_payload(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Decodes a bare string payload, tolerating a trailing NUL terminator.
pub fn decode_str_payload(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}
