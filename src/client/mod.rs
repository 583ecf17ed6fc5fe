//! Client Module
//!
//! Session machines used by the interactive client binary. A client first
//! authenticates to the Directory over the framed link; content commands
//! come back as redirects, after which the client opens a fresh text-protocol
//! connection straight to the owning Node.
//!
//! ## Submodules
//! - **`session`**: the Directory (framed) and Node (line-based) sessions.

pub mod session;

#[cfg(test)]
mod tests;
