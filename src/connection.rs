//! Connection lifecycle, request/response multiplexing, and the async-stop
//! channel.
//!
//! One spawned event-loop task exclusively owns the socket and every piece
//! of protocol state:
//! - the **pending queue** — outgoing commands are matched to incoming
//!   replies strictly in FIFO order (the wire carries no request IDs);
//! - the **async-stop slot** — a one-value mailbox for stop replies that
//!   arrive while nothing is pending, which is the normal case after a
//!   fire-and-forget `continue`;
//! - the **running flag** — set when a resume command is issued, cleared
//!   when any stop reply is observed; drives `pause`'s short-circuit;
//! - the **no-ack flag** — negotiated during the handshake.
//!
//! Callers talk to the loop only through an mpsc op channel and await their
//! oneshot resolver, so no protocol state is ever shared or locked.
//! Per-command timeouts run caller-side; expiry sends a cancel op that
//! removes that specific queue entry (which may no longer be at the head).
//!
//! Known limitation, inherited from the protocol: if a command times out
//! and the target replies very late, that stale reply resolves whatever is
//! then at the head of the queue.  The wire has no correlation IDs, so the
//! only detectable case — a reply with nothing pending at all — is logged
//! and dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::GdbError;
use crate::packet::{self, Inbound, PacketParser};
use crate::reply::{classify, Delivered, StopReply};
use crate::state::ConnectionState;

/// Raw interrupt byte, written unframed.
const INTERRUPT: u8 = 0x03;

/// Features advertised during the handshake.
const SUPPORTED: &str = "qSupported:multiprocess+;swbreak+;hwbreak+";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunable timeouts and sizes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for the TCP connect itself, distinct from command timeouts.
    pub connect_timeout: Duration,
    /// Default per-command timeout.
    pub command_timeout: Duration,
    /// Per-chunk timeout for register and memory writes.  Generous: writes
    /// on this class of target are empirically slower than reads.
    pub write_timeout: Duration,
    /// Timeout for `qRcmd` monitor commands, which often run host-side
    /// emulator operations.
    pub monitor_timeout: Duration,
    /// Memory writes are split into chunks of this many bytes.
    pub chunk_size: usize,
    /// Send a raw interrupt byte right after connecting.  The target only
    /// services the protocol once halted; without the nudge, initial
    /// commands may be dropped.
    pub interrupt_on_connect: bool,
    /// How long to wait after the connect-time interrupt before the
    /// handshake starts.
    pub settle_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(30),
            chunk_size: 256,
            interrupt_on_connect: true,
            settle_delay: Duration::from_millis(200),
        }
    }
}

// ---------------------------------------------------------------------------
// Ops — caller → event loop
// ---------------------------------------------------------------------------

type Resolver = oneshot::Sender<Result<String, GdbError>>;

enum Op {
    /// Enqueue a pending resolver, then write the framed command.
    Request {
        id: u64,
        label: String,
        line: Vec<u8>,
        tx: Resolver,
    },
    /// A caller-side timeout fired; drop that entry wherever it sits.
    Cancel { id: u64 },
    /// Fire-and-forget `vCont;c`: no pending entry is created.
    Resume {
        tx: oneshot::Sender<Result<(), GdbError>>,
    },
    /// `vCont;s`, awaited like a normal request.
    Step { id: u64, tx: Resolver },
    /// Consume the stop slot, short-circuit if already halted, or send the
    /// raw interrupt byte and wait.
    Pause { id: u64, tx: Resolver },
    /// Consume the stop slot, or wait for the next stop reply.
    WaitStop { id: u64, tx: Resolver },
    /// `QStartNoAckMode` was acknowledged; stop sending acks.
    NoAck,
    /// Handshake finished; publish the Ready state before acking, so the
    /// connection never looks Handshaking after `connect` returns.
    HandshakeDone { tx: oneshot::Sender<()> },
    /// Tear the connection down.
    Disconnect,
}

struct Pending {
    id: u64,
    label: String,
    tx: Resolver,
}

// ---------------------------------------------------------------------------
// Connection — the caller-side handle
// ---------------------------------------------------------------------------

/// A live connection to the target's GDB server.
///
/// Exclusive-ownership lifecycle: create with [`Connection::connect`],
/// operate, then [`Connection::disconnect`].  Reconnecting means creating a
/// new value; the old socket is torn down and all its pending operations
/// fail.  Callers must not issue overlapping commands without awaiting the
/// first — the queue is strict FIFO and has no per-request identity beyond
/// position.
pub struct Connection {
    ops: mpsc::Sender<Op>,
    state: watch::Receiver<ConnectionState>,
    next_id: AtomicU64,
    config: Config,
    task: JoinHandle<()>,
}

impl Connection {
    /// Open the socket, nudge the target out of a running state, and run
    /// the handshake (feature negotiation, no-ack mode, halt-reason sync).
    /// The connection only counts as ready once all of that has finished.
    pub async fn connect(addr: impl ToSocketAddrs, config: Config) -> Result<Self, GdbError> {
        let mut stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GdbError::ConnectTimeout(config.connect_timeout))??;
        stream.set_nodelay(true)?;

        if config.interrupt_on_connect {
            stream.write_all(&[INTERRUPT]).await?;
            tokio::time::sleep(config.settle_delay).await;
        }

        let conn = Self::from_stream(stream, config);
        conn.handshake().await?;
        Ok(conn)
    }

    /// Spawn the event loop over an already-open stream.  No handshake is
    /// performed; useful for tests and non-TCP transports.
    pub fn from_stream<S>(stream: S, config: Config) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (ops_tx, ops_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Handshaking);
        let (reader, writer) = tokio::io::split(stream);

        let mux = Mux {
            writer,
            parser: PacketParser::new(),
            pending: VecDeque::new(),
            stop_slot: None,
            running: false,
            no_ack: false,
            state: state_tx,
        };
        let task = tokio::spawn(event_loop(mux, ops_rx, reader));

        Self {
            ops: ops_tx,
            state: state_rx,
            next_id: AtomicU64::new(1),
            config,
            task,
        }
    }

    /// Feature negotiation, best-effort no-ack mode, halt-reason sync.
    async fn handshake(&self) -> Result<(), GdbError> {
        let features = self.request(SUPPORTED).await?;
        log::debug!("[rsp] target features: {features}");

        // Best-effort: anything other than OK just leaves ack mode on.
        match self.request("QStartNoAckMode").await {
            Ok(reply) if reply == "OK" => {
                self.send_op(Op::NoAck).await?;
                log::debug!("[rsp] no-ack mode enabled");
            }
            Ok(reply) => log::debug!("[rsp] no-ack mode declined: {reply:?}"),
            Err(e @ GdbError::ConnectionLost(_)) => return Err(e),
            Err(e) => log::debug!("[rsp] no-ack negotiation failed: {e}"),
        }

        let halt = self.request("?").await?;
        log::debug!("[rsp] halt reason: {halt}");

        let (tx, rx) = oneshot::channel();
        self.send_op(Op::HandshakeDone { tx }).await?;
        rx.await
            .map_err(|_| GdbError::ConnectionLost("event loop terminated".into()))
    }

    // -----------------------------------------------------------------------
    // Raw command interface
    // -----------------------------------------------------------------------

    /// Send a command and await its reply with the default command timeout.
    ///
    /// This is the escape hatch for protocol strings the typed surface does
    /// not cover; most callers want [`crate::debugger::Debugger`] instead.
    pub async fn request(&self, command: &str) -> Result<String, GdbError> {
        self.request_with_timeout(command, self.config.command_timeout)
            .await
    }

    /// [`Connection::request`] with an explicit per-command timeout.
    pub async fn request_with_timeout(
        &self,
        command: &str,
        dur: Duration,
    ) -> Result<String, GdbError> {
        self.request_raw(command.to_string(), command.as_bytes().to_vec(), dur)
            .await
    }

    /// Commands whose wire form is not valid UTF-8 (binary `X` writes)
    /// carry a separate display label for logs and errors.
    pub(crate) async fn request_raw(
        &self,
        label: String,
        line: Vec<u8>,
        dur: Duration,
    ) -> Result<String, GdbError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.send_op(Op::Request {
            id,
            label: label.clone(),
            line,
            tx,
        })
        .await?;
        self.await_reply(id, label, dur, rx).await
    }

    async fn await_reply(
        &self,
        id: u64,
        label: String,
        dur: Duration,
        rx: oneshot::Receiver<Result<String, GdbError>>,
    ) -> Result<String, GdbError> {
        match timeout(dur, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GdbError::ConnectionLost("event loop terminated".into())),
            Err(_) => {
                // Remove only this entry; the socket stays up.
                let _ = self.ops.send(Op::Cancel { id }).await;
                Err(GdbError::Timeout {
                    command: label,
                    timeout: dur,
                })
            }
        }
    }

    async fn send_op(&self, op: Op) -> Result<(), GdbError> {
        self.ops
            .send(op)
            .await
            .map_err(|_| GdbError::ConnectionLost("event loop terminated".into()))
    }

    // -----------------------------------------------------------------------
    // Execution control
    // -----------------------------------------------------------------------

    /// Resume execution, fire-and-forget.  The target will not reply until
    /// it later stops, which may be arbitrarily far in the future; collect
    /// that stop with [`Connection::wait_for_stop`] or [`Connection::pause`].
    pub async fn resume(&self) -> Result<(), GdbError> {
        let (tx, rx) = oneshot::channel();
        self.send_op(Op::Resume { tx }).await?;
        rx.await
            .map_err(|_| GdbError::ConnectionLost("event loop terminated".into()))?
    }

    /// Execute one instruction and wait for the resulting stop reply.
    pub async fn step(&self) -> Result<StopReply, GdbError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.send_op(Op::Step { id, tx }).await?;
        let raw = self
            .await_reply(id, "vCont;s".into(), self.config.command_timeout, rx)
            .await?;
        into_stop("vCont;s", raw)
    }

    /// Halt a running target.
    ///
    /// If a stop already arrived unsolicited it is consumed with no wire
    /// traffic; if the target is not running, a synthetic `S00` reply is
    /// returned, again with no wire traffic.  Otherwise a raw interrupt
    /// byte is sent and the next delivered packet is awaited.
    pub async fn pause(&self) -> Result<StopReply, GdbError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.send_op(Op::Pause { id, tx }).await?;
        let raw = self
            .await_reply(id, "interrupt".into(), self.config.command_timeout, rx)
            .await?;
        into_stop("interrupt", raw)
    }

    /// Block until the target halts, up to `dur`.
    ///
    /// Consumes the async-stop slot immediately if it is populated; a
    /// second call then waits for a fresh stop (no stale value).
    pub async fn wait_for_stop(&self, dur: Duration) -> Result<StopReply, GdbError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.send_op(Op::WaitStop { id, tx }).await?;
        let raw = self.await_reply(id, "wait-for-stop".into(), dur, rx).await?;
        into_stop("wait-for-stop", raw)
    }

    // -----------------------------------------------------------------------
    // State & teardown
    // -----------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A watch receiver for callers that want to await state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tear the connection down.  All outstanding operations fail with a
    /// connection-lost error.
    pub async fn disconnect(self) {
        let _ = self.ops.send(Op::Disconnect).await;
        let _ = self.task.await;
    }
}

/// A stop-shaped raw payload, or an unexpected-reply error naming the
/// command that produced it.
fn into_stop(command: &str, raw: String) -> Result<StopReply, GdbError> {
    StopReply::parse(&raw).ok_or_else(move || GdbError::UnexpectedReply {
        command: command.to_string(),
        reply: raw,
    })
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// All protocol state, owned by the event-loop task.
struct Mux<S> {
    writer: WriteHalf<S>,
    parser: PacketParser,
    pending: VecDeque<Pending>,
    stop_slot: Option<String>,
    running: bool,
    no_ack: bool,
    state: watch::Sender<ConnectionState>,
}

async fn event_loop<S>(mut mux: Mux<S>, mut ops: mpsc::Receiver<Op>, mut reader: ReadHalf<S>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut chunk = [0u8; 4096];
    loop {
        tokio::select! {
            op = ops.recv() => match op {
                None | Some(Op::Disconnect) => {
                    mux.shutdown("disconnected");
                    return;
                }
                Some(op) => {
                    if let Err(reason) = mux.handle_op(op).await {
                        mux.shutdown(&reason);
                        return;
                    }
                }
            },
            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    mux.shutdown("peer closed the connection");
                    return;
                }
                Err(e) => {
                    mux.shutdown(&format!("socket read failed: {e}"));
                    return;
                }
                Ok(n) => {
                    if let Err(reason) = mux.process_bytes(&chunk[..n]).await {
                        mux.shutdown(&reason);
                        return;
                    }
                }
            },
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin + 'static> Mux<S> {
    async fn handle_op(&mut self, op: Op) -> Result<(), String> {
        match op {
            Op::Request { id, label, line, tx } => {
                log::trace!("[rsp] → {label}");
                self.pending.push_back(Pending { id, label, tx });
                self.write(&packet::frame(&line)).await?;
            }
            Op::Cancel { id } => {
                if let Some(pos) = self.pending.iter().position(|p| p.id == id) {
                    let dropped = self.pending.remove(pos).expect("position is in range");
                    log::debug!("[rsp] `{}` timed out; dropped from queue", dropped.label);
                }
            }
            Op::Resume { tx } => {
                // Clear any stale stop before the target starts running.
                self.stop_slot = None;
                self.running = true;
                let _ = self.state.send(ConnectionState::Running);
                log::trace!("[rsp] → vCont;c");
                match self.write(&packet::frame(b"vCont;c")).await {
                    Ok(()) => {
                        let _ = tx.send(Ok(()));
                    }
                    Err(reason) => {
                        let _ = tx.send(Err(GdbError::ConnectionLost(reason.clone())));
                        return Err(reason);
                    }
                }
            }
            Op::Step { id, tx } => {
                self.stop_slot = None;
                self.running = true;
                let _ = self.state.send(ConnectionState::Running);
                log::trace!("[rsp] → vCont;s");
                self.pending.push_back(Pending {
                    id,
                    label: "vCont;s".into(),
                    tx,
                });
                self.write(&packet::frame(b"vCont;s")).await?;
            }
            Op::Pause { id, tx } => {
                if let Some(raw) = self.stop_slot.take() {
                    let _ = tx.send(Ok(raw));
                } else if !self.running {
                    // Already halted; synthesize a stop with no wire traffic.
                    let _ = tx.send(Ok("S00".to_string()));
                } else {
                    log::trace!("[rsp] → interrupt (0x03)");
                    self.pending.push_back(Pending {
                        id,
                        label: "interrupt".into(),
                        tx,
                    });
                    self.write(&[INTERRUPT]).await?;
                }
            }
            Op::WaitStop { id, tx } => {
                if let Some(raw) = self.stop_slot.take() {
                    let _ = tx.send(Ok(raw));
                } else {
                    // No wire traffic; the next stop reply resolves this.
                    self.pending.push_back(Pending {
                        id,
                        label: "wait-for-stop".into(),
                        tx,
                    });
                }
            }
            Op::NoAck => self.no_ack = true,
            Op::HandshakeDone { tx } => {
                let _ = self.state.send(if self.running {
                    ConnectionState::Running
                } else {
                    ConnectionState::Ready
                });
                let _ = tx.send(());
            }
            Op::Disconnect => unreachable!("handled by the select loop"),
        }
        Ok(())
    }

    async fn process_bytes(&mut self, bytes: &[u8]) -> Result<(), String> {
        for item in self.parser.feed(bytes) {
            match item {
                // Ack of our own last packet; nothing to do.
                Inbound::Ack => {}
                Inbound::Nack => {
                    log::warn!("[rsp] peer rejected our packet (no retransmit attempted)");
                }
                Inbound::Malformed { computed, received } => {
                    log::warn!(
                        "[rsp] checksum mismatch (computed {computed:02x}, wire {received:?}); packet dropped"
                    );
                    if !self.no_ack {
                        self.write(b"-").await?;
                    }
                }
                Inbound::Packet(payload) => {
                    // Acknowledge before classifying and dispatching.
                    if !self.no_ack {
                        self.write(b"+").await?;
                    }
                    self.dispatch(payload);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, payload: Vec<u8>) {
        match classify(&payload) {
            Delivered::Console(text) => {
                // Diagnostic output; never delivered to a resolver.
                log::debug!("[target] {}", text.trim_end());
            }
            Delivered::Stop(stop) if self.pending.is_empty() => {
                log::debug!("[rsp] ← async stop {stop}");
                self.running = false;
                self.publish_halted();
                self.stop_slot = Some(stop.raw);
            }
            Delivered::Stop(stop) => {
                log::trace!("[rsp] ← {}", stop.raw);
                self.running = false;
                self.publish_halted();
                let head = self.pending.pop_front().expect("queue checked non-empty");
                let _ = head.tx.send(Ok(stop.raw));
            }
            Delivered::Reply(raw) => match self.pending.pop_front() {
                Some(head) => {
                    log::trace!("[rsp] ← {raw}");
                    let _ = head.tx.send(Ok(raw));
                }
                None => {
                    // Stale (post-timeout) or spurious; see the module doc.
                    log::warn!("[rsp] unsolicited reply dropped: {raw:?}");
                }
            },
        }
    }

    /// Stop replies observed during the handshake (`?`) must not publish
    /// Ready early; HandshakeDone does that.
    fn publish_halted(&self) {
        if !matches!(*self.state.borrow(), ConnectionState::Handshaking) {
            let _ = self.state.send(ConnectionState::Ready);
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| format!("socket write failed: {e}"))
    }

    /// Publish the terminal state and fail every pending request.  The
    /// async-stop slot and running flag are left as-is; a caller issuing
    /// new operations must reconnect and re-handshake anyway.
    fn shutdown(&mut self, reason: &str) {
        let _ = self.state.send(ConnectionState::Disconnected);
        if !self.pending.is_empty() {
            log::warn!(
                "[rsp] failing {} pending command(s): {reason}",
                self.pending.len()
            );
        }
        for p in self.pending.drain(..) {
            let _ = p.tx.send(Err(GdbError::ConnectionLost(reason.to_string())));
        }
        log::debug!("[rsp] connection closed: {reason}");
    }
}
