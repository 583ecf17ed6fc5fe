//! Storage Node Module
//!
//! A Node owns the authoritative text of its files on disk and runs two
//! concurrent activities: a control link to the Directory (registration and
//! forwarded commands) and a public listener accepting direct Client
//! connections speaking the line-based text protocol.
//!
//! ## Core Mechanisms
//! - **Sentence engine**: files are tokenised into whitespace-delimited words;
//!   sentence boundaries fall after words ending in `.`, `!` or `?`. Edits
//!   target one sentence at a time.
//! - **Advisory locks**: concurrent writers to the same `(file, sentence)` are
//!   serialised; writers to distinct sentences proceed in parallel and compose
//!   through a commit-time three-way merge against the live file.
//! - **History**: every commit snapshots the pre-commit file into a per-file
//!   undo journal; checkpoints are immutable tagged snapshots.
//!
//! ## Submodules
//! - **`sentences`**: tokenisation, boundary detection, splice and merge.
//! - **`locks`**: the in-memory sentence-lock table.
//! - **`persistence`**: on-disk layout, the metadata table, ACL storage.
//! - **`history`**: undo backups and journal replay.
//! - **`checkpoints`**: tagged snapshots, revert, listings.
//! - **`requests`**: per-file access-request log.
//! - **`handlers`**: the direct-client text-protocol worker.
//! - **`service`**: Directory registration and the control-command loop.

pub mod checkpoints;
pub mod handlers;
pub mod history;
pub mod locks;
pub mod persistence;
pub mod requests;
pub mod sentences;
pub mod service;

#[cfg(test)]
mod tests;
