//! Directory Module
//!
//! The central coordinator. Accepts TCP connections from both Clients and
//! Nodes, multiplexing on the source component of the first frame. Owns the
//! routing and metadata plane: the file index, the folder registry, the LRU
//! location cache, the Node registry with one connection actor per Node, and
//! the active-user list.
//!
//! ## Core Mechanisms
//! - **Name index**: a name -> record map behind a sharded lock; carries the
//!   owner, owning Node slot, folder path, cached statistics and the ACL.
//! - **Location cache**: fixed-capacity LRU from file name to Node slot,
//!   invalidated on delete, rebuild and Node purge.
//! - **Connection actors**: each registered Node's control socket is owned by
//!   a single task; request/response pairs are queued work items answered
//!   over oneshot channels, so requests can never interleave mid-reply.
//! - **Redirection**: content operations answer with the owning Node's public
//!   address; the Client reconnects there directly.
//!
//! ## Submodules
//! - **`types`**: in-memory file and folder records.
//! - **`index`**: the file/folder index and listing renderers.
//! - **`cache`**: the LRU location cache.
//! - **`registry`**: Node slots and connection actors.
//! - **`users`**: the active-user list.
//! - **`handlers`**: per-command client handlers.
//! - **`exec`**: the opt-in restricted EXEC runner.
//! - **`service`**: listener, connection routing, and session loops.

pub mod cache;
pub mod exec;
pub mod handlers;
pub mod index;
pub mod registry;
pub mod service;
pub mod types;
pub mod users;
