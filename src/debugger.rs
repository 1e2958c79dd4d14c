//! Typed command surface over a [`Connection`].
//!
//! Every operation here serializes to one or more RSP commands, awaits the
//! reply through the multiplexer, and converts the raw text into typed
//! results or errors.  Nothing below this layer knows what a register or a
//! breakpoint is; nothing above it ever sees a protocol string.

use std::str::FromStr;
use std::time::Duration;

use crate::connection::{Config, Connection};
use crate::error::GdbError;
use crate::packet;
use crate::registers::{Register, RegisterFile};
use crate::reply::{self, StopReply};

/// Watchpoint access kinds, each mapping to a fixed numeric tag in the
/// `Z`/`z` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Break when the address range is written.
    Write,
    /// Break when the address range is read.
    Read,
    /// Break on any access.
    Access,
}

impl WatchKind {
    fn code(self) -> u8 {
        match self {
            WatchKind::Write => 2,
            WatchKind::Read => 3,
            WatchKind::Access => 4,
        }
    }
}

impl FromStr for WatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "write" => Ok(WatchKind::Write),
            "read" => Ok(WatchKind::Read),
            "access" => Ok(WatchKind::Access),
            other => Err(format!("unknown watchpoint kind `{other}`")),
        }
    }
}

/// The debugging operations exposed to callers: registers, memory,
/// breakpoints, watchpoints, execution control, and the monitor tunnel.
pub struct Debugger {
    conn: Connection,
}

impl Debugger {
    /// Connect to the target and run the protocol handshake.
    pub async fn connect(
        addr: impl tokio::net::ToSocketAddrs,
        config: Config,
    ) -> Result<Self, GdbError> {
        let conn = Connection::connect(addr, config).await?;
        Ok(Self { conn })
    }

    /// Wrap an already-established connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// The underlying connection, for raw commands and state observation.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn config(&self) -> &Config {
        self.conn.config()
    }

    // -----------------------------------------------------------------------
    // Registers
    // -----------------------------------------------------------------------

    /// Read all registers with one `g` command.
    pub async fn read_registers(&self) -> Result<RegisterFile, GdbError> {
        let reply = self.conn.request("g").await?;
        if let Some(code) = reply::parse_error(&reply) {
            return Err(GdbError::Target {
                context: "register read".into(),
                code,
            });
        }
        RegisterFile::decode(&reply)
    }

    /// Read a single register by positional index (`p`).
    pub async fn read_register(&self, register: Register) -> Result<u32, GdbError> {
        let command = format!("p{:x}", register.index());
        let reply = self.conn.request(&command).await?;
        if let Some(code) = reply::parse_error(&reply) {
            return Err(GdbError::Target {
                context: format!("read of register {register}"),
                code,
            });
        }
        if reply.len() < 8 {
            return Err(GdbError::ReplyTooShort {
                expected: 8,
                actual: reply.len(),
            });
        }
        let field = reply.get(..8).ok_or_else(|| GdbError::BadHex(reply.clone()))?;
        u32::from_str_radix(field, 16).map_err(|_| GdbError::BadHex(reply.clone()))
    }

    /// Write a single register (`P`).  The reply must be exactly `OK`.
    pub async fn write_register(&self, register: Register, value: u32) -> Result<(), GdbError> {
        let command = format!("P{:x}={value:08x}", register.index());
        self.expect_ok(
            &command,
            format!("write of register {register} (index {})", register.index()),
            self.config().write_timeout,
        )
        .await
    }

    /// Write the complete register file with one `G` command.
    pub async fn write_registers(&self, file: &RegisterFile) -> Result<(), GdbError> {
        let command = format!("G{}", file.encode());
        self.expect_ok(&command, "register file write".into(), self.config().write_timeout)
            .await
    }

    /// Write any subset of registers, one positional `P` command each.
    pub async fn write_register_set(&self, updates: &[(Register, u32)]) -> Result<(), GdbError> {
        for &(register, value) in updates {
            self.write_register(register, value).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    /// Read `len` bytes at `addr` with one `m` command.
    pub async fn read_memory(&self, addr: u32, len: u32) -> Result<Vec<u8>, GdbError> {
        let command = format!("m{addr:x},{len:x}");
        let reply = self.conn.request(&command).await?;
        if let Some(code) = reply::parse_error(&reply) {
            return Err(GdbError::Target {
                context: format!("read of {len} bytes at {addr:#x}"),
                code,
            });
        }
        hex::decode(&reply).map_err(|_| GdbError::BadHex(reply))
    }

    /// Write `data` at `addr`, chunked.
    ///
    /// Each chunk goes out as a textual `M` command first; if that chunk
    /// fails (timeout or error reply), the same chunk is retried once with
    /// the binary `X` command before the whole write is aborted.  Chunks
    /// are not pipelined: every chunk must be acknowledged with `OK` before
    /// the next is sent.  On a chunk's final failure, bytes written by
    /// earlier chunks stay written.
    pub async fn write_memory(&self, addr: u32, data: &[u8]) -> Result<(), GdbError> {
        let chunk_size = self.config().chunk_size;
        for (i, chunk) in data.chunks(chunk_size).enumerate() {
            let chunk_addr = addr.wrapping_add((i * chunk_size) as u32);
            self.write_chunk(chunk_addr, chunk).await?;
        }
        Ok(())
    }

    async fn write_chunk(&self, addr: u32, chunk: &[u8]) -> Result<(), GdbError> {
        let command = format!("M{addr:x},{:x}:{}", chunk.len(), hex::encode(chunk));
        match self
            .conn
            .request_with_timeout(&command, self.config().write_timeout)
            .await
        {
            Ok(reply) if reply == "OK" => return Ok(()),
            Ok(reply) => {
                log::debug!("[rsp] M write at {addr:#x} rejected ({reply:?}); retrying as binary");
            }
            Err(GdbError::Timeout { .. }) => {
                log::debug!("[rsp] M write at {addr:#x} timed out; retrying as binary");
            }
            Err(e) => return Err(e),
        }

        // Binary fallback: byte-stuffed payload inside the normal framing.
        let label = format!("X{addr:x},{:x}", chunk.len());
        let mut line = format!("X{addr:x},{:x}:", chunk.len()).into_bytes();
        line.extend_from_slice(&packet::escape_binary(chunk));
        let reply = self
            .conn
            .request_raw(label.clone(), line, self.config().write_timeout)
            .await?;
        if reply == "OK" {
            return Ok(());
        }
        if let Some(code) = reply::parse_error(&reply) {
            return Err(GdbError::Target {
                context: format!("write of {} bytes at {addr:#x}", chunk.len()),
                code,
            });
        }
        Err(GdbError::UnexpectedReply {
            command: label,
            reply,
        })
    }

    // -----------------------------------------------------------------------
    // Breakpoints & watchpoints
    // -----------------------------------------------------------------------

    /// Set a software breakpoint at `addr` (`Z0`, kind 2).
    pub async fn set_breakpoint(&self, addr: u32) -> Result<(), GdbError> {
        let command = format!("Z0,{addr:x},2");
        self.expect_ok(
            &command,
            format!("breakpoint at {addr:#x}"),
            self.config().command_timeout,
        )
        .await
    }

    /// Clear a software breakpoint at `addr`.
    pub async fn clear_breakpoint(&self, addr: u32) -> Result<(), GdbError> {
        let command = format!("z0,{addr:x},2");
        self.expect_ok(
            &command,
            format!("breakpoint at {addr:#x}"),
            self.config().command_timeout,
        )
        .await
    }

    /// Set a watchpoint covering `len` bytes at `addr`.
    pub async fn set_watchpoint(
        &self,
        addr: u32,
        len: u32,
        kind: WatchKind,
    ) -> Result<(), GdbError> {
        let command = format!("Z{},{addr:x},{len:x}", kind.code());
        self.expect_ok(
            &command,
            format!("{kind:?} watchpoint at {addr:#x}"),
            self.config().command_timeout,
        )
        .await
    }

    /// Clear a watchpoint.  The kind must match the one it was set with.
    pub async fn clear_watchpoint(
        &self,
        addr: u32,
        len: u32,
        kind: WatchKind,
    ) -> Result<(), GdbError> {
        let command = format!("z{},{addr:x},{len:x}", kind.code());
        self.expect_ok(
            &command,
            format!("{kind:?} watchpoint at {addr:#x}"),
            self.config().command_timeout,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Execution control
    // -----------------------------------------------------------------------

    /// Resume execution without waiting for a stop (see
    /// [`Connection::resume`]).
    pub async fn resume(&self) -> Result<(), GdbError> {
        self.conn.resume().await
    }

    /// Execute one instruction and return the stop reply.
    pub async fn step(&self) -> Result<StopReply, GdbError> {
        self.conn.step().await
    }

    /// Halt a running target (see [`Connection::pause`]).
    pub async fn pause(&self) -> Result<StopReply, GdbError> {
        self.conn.pause().await
    }

    /// Block until the target halts, up to `dur`.
    pub async fn wait_for_stop(&self, dur: Duration) -> Result<StopReply, GdbError> {
        self.conn.wait_for_stop(dur).await
    }

    // -----------------------------------------------------------------------
    // Monitor tunnel
    // -----------------------------------------------------------------------

    /// Send a vendor monitor command through `qRcmd` and return its decoded
    /// text output.  Uses the (long) monitor timeout; these often run
    /// host-side emulator operations.
    pub async fn monitor(&self, command: &str) -> Result<String, GdbError> {
        self.monitor_with_timeout(command, self.config().monitor_timeout)
            .await
    }

    /// [`Debugger::monitor`] with a caller-supplied timeout.
    pub async fn monitor_with_timeout(
        &self,
        command: &str,
        dur: Duration,
    ) -> Result<String, GdbError> {
        let wire = format!("qRcmd,{}", hex::encode(command.as_bytes()));
        let reply = self.conn.request_with_timeout(&wire, dur).await?;
        if let Some(code) = reply::parse_error(&reply) {
            return Err(GdbError::Target {
                context: format!("monitor command `{command}`"),
                code,
            });
        }
        if reply == "OK" || reply.is_empty() {
            return Ok(String::new());
        }
        match hex::decode(&reply) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => Err(GdbError::BadHex(reply)),
        }
    }

    /// Tear the connection down.
    pub async fn disconnect(self) {
        self.conn.disconnect().await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Issue `command` and require the reply to be exactly `OK`; anything
    /// else is an error naming `context`.
    async fn expect_ok(
        &self,
        command: &str,
        context: String,
        dur: Duration,
    ) -> Result<(), GdbError> {
        let reply = self.conn.request_with_timeout(command, dur).await?;
        if reply == "OK" {
            return Ok(());
        }
        if let Some(code) = reply::parse_error(&reply) {
            return Err(GdbError::Target { context, code });
        }
        Err(GdbError::UnexpectedReply {
            command: context,
            reply,
        })
    }
}
