//! Connection lifecycle states.
//!
//! A [`crate::connection::Connection`] only exists once the TCP socket is
//! open, so the pre-connect states live in the caller (no object, no
//! state); everything after that is tracked here and published through a
//! `tokio::sync::watch` channel.
//!
//! ```text
//  HANDSHAKING ──halt reason answered──▶ READY ──vCont;c / vCont;s──▶ RUNNING
//       │                                  ▲                             │
//       │                                  └────────stop reply───────────┘
//       │                                        ("stopped" == READY)
//       └──────────socket error / close / disconnect──▶ DISCONNECTED
//! ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open; feature negotiation and halt-reason sync in progress.
    Handshaking,
    /// Handshake complete and the target is halted; commands may be issued.
    Ready,
    /// A continue/step was issued and no stop reply has been seen yet.
    Running,
    /// Socket error, peer close, or explicit disconnect.  Terminal.
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
