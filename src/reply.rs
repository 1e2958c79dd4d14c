//! Classification of delivered packet payloads.
//!
//! Every payload the framing layer hands over is exactly one of three
//! things, and the distinction drives the multiplexer in
//! [`crate::connection`]:
//! - **Console output** (`O<hex>`) — diagnostic text from the target,
//!   decoded and logged, never delivered to a resolver.
//! - **Stop reply** (`S..`/`T..`) — the target halted; routed to the oldest
//!   pending resolver, or parked in the async-stop slot when nobody is
//!   waiting.
//! - **Reply** — everything else; resolves the oldest pending request.
//!
//! Modelling this as a tagged union keeps the prefix-sniffing in one place
//! instead of scattered through the dispatch code.

/// A classified payload, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    /// Decoded `O<hex>` console output.
    Console(String),
    /// A stop reply, parsed.
    Stop(StopReply),
    /// Any other reply, as text.
    Reply(String),
}

/// A `S<sig>` or `T<sig>...` packet reporting that the target halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReply {
    /// The signal number (e.g. 5 = SIGTRAP).
    pub signal: u8,
    /// The payload exactly as received, for callers that inspect `T` pairs.
    pub raw: String,
}

impl StopReply {
    /// Parse a stop reply.  Returns `None` unless the payload starts with
    /// `S` or `T` followed by a two-digit hex signal number.
    pub fn parse(payload: &str) -> Option<Self> {
        let rest = payload
            .strip_prefix('S')
            .or_else(|| payload.strip_prefix('T'))?;
        if rest.len() < 2 || !rest.is_char_boundary(2) {
            return None;
        }
        let signal = u8::from_str_radix(&rest[..2], 16).ok()?;
        Some(Self {
            signal,
            raw: payload.to_string(),
        })
    }
}

impl std::fmt::Display for StopReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (signal {})", self.raw, self.signal)
    }
}

/// Classify a raw payload.  Payloads are ASCII for every command this
/// client issues; non-UTF-8 bytes are replaced rather than rejected.
pub fn classify(payload: &[u8]) -> Delivered {
    let text = String::from_utf8_lossy(payload).into_owned();
    if let Some(console) = parse_console(&text) {
        return Delivered::Console(console);
    }
    if let Some(stop) = StopReply::parse(&text) {
        return Delivered::Stop(stop);
    }
    Delivered::Reply(text)
}

/// Decode an `O<hex>` console-output packet.
///
/// The literal reply `"OK"` must not be mistaken for console output: the
/// remainder after `O` has to be non-empty, even-length hex.
fn parse_console(payload: &str) -> Option<String> {
    let rest = payload.strip_prefix('O')?;
    if rest.is_empty() || rest.len() % 2 != 0 || !rest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let bytes = hex::decode(rest).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse an `E<code>` target-error reply.
pub fn parse_error(reply: &str) -> Option<u8> {
    let rest = reply.strip_prefix('E')?;
    if rest.len() != 2 || !rest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(rest, 16).ok()
}
