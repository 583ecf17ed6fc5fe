//! Wire Protocol Module
//!
//! Defines the two protocol surfaces the system speaks:
//!
//! - **Binary frames** (Client <-> Directory, Directory <-> Node): a fixed
//!   266-byte little-endian header followed by an opaque payload. Payloads are
//!   fixed-width records (identities 64 bytes, names 256 bytes) so that every
//!   message has a single unambiguous encoding.
//! - **Text dialogue** (Client <-> Node): newline-terminated ASCII lines.
//!   Replies start with an `OK_2xx` or `ERR_4xx`/`ERR_5xx` status token;
//!   multi-line responses end with a sentinel line.
//!
//! ## Submodules
//! - **`frames`**: message types, the frame header, and async send/receive.
//! - **`types`**: payload records and their fixed-width codecs.
//! - **`status`**: text-protocol status tokens, sentinels, and the error
//!   taxonomy shared by both protocol surfaces.

pub mod frames;
pub mod status;
pub mod types;

#[cfg(test)]
mod tests;
