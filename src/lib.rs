//! `uae-rsp` — a GDB Remote Serial Protocol (RSP) client for remote-debugging
//! an emulated 68k Amiga over TCP.
//!
//! # Architecture
//!
//! ```text
//!  Caller (typed operations)
//!      │  read_memory / set_breakpoint / step / monitor …
//!      ▼
//!  Debugger                       ┌──────────────────────────┐
//!      │  request(command)        │  event-loop task         │
//!      ▼                          │   ├── pending FIFO       │
//!  Connection ──── mpsc ops ─────▶│   ├── async-stop slot    │
//!      ▲                          │   ├── running flag       │
//!      │  oneshot resolvers       │   └── PacketParser       │
//!      └──────────────────────────┴──────────┬───────────────┘
//!                                            │ raw bytes
//!                                     ┌──────▼──────┐
//!                                     │  TcpStream  │
//!                                     └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire framing: `$payload#xx`, checksums, binary escaping
//! - [`reply`]      — classification of delivered payloads (console / stop / reply)
//! - [`registers`]  — the 68k register file and its positional wire encoding
//! - [`state`]      — connection lifecycle states
//! - [`connection`] — event loop, request/response multiplexer, async-stop channel
//! - [`debugger`]   — typed command surface (registers, memory, breakpoints, …)
//! - [`error`]      — the shared error taxonomy
//!
//! The protocol is a single half-duplex request/response channel with one
//! carve-out: stop notifications may arrive unsolicited after a
//! fire-and-forget `continue`. The [`connection`] module owns that
//! two-channel design; everything above it is plain async Rust.

pub mod connection;
pub mod debugger;
pub mod error;
pub mod packet;
pub mod registers;
pub mod reply;
pub mod state;

pub use connection::{Config, Connection};
pub use debugger::{Debugger, WatchKind};
pub use error::GdbError;
pub use registers::{Register, RegisterFile};
pub use reply::StopReply;
pub use state::ConnectionState;
