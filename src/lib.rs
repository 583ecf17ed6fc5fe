//! Distributed Text-File Store Library
//!
//! This library crate defines the core modules that make up the distributed
//! system. It serves as the foundation for the three binaries (`directory`,
//! `node`, `client`).
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`protocol`**: The wire layer. Binary framed messages on the
//!   Client<->Directory and Directory<->Node links, and the constants of the
//!   line-based text dialogue spoken on the Client<->Node link.
//! - **`directory`**: The central coordinator. Owns the file->Node index, the
//!   LRU location cache, the Node registry (one connection actor per Node),
//!   permission enforcement, and the active-user list.
//! - **`node`**: A storage server. Owns the authoritative file content plus
//!   per-file undo history, checkpoints, and access-request logs, and runs
//!   the sentence-level editing engine behind advisory locks.
//! - **`client`**: The stateful session machines the interactive client is
//!   built from: a framed Directory session and a text-protocol Node session
//!   opened on redirect.

pub mod client;
pub mod directory;
pub mod node;
pub mod protocol;
