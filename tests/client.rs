//! End-to-end tests against a scripted mock GDB server.
//!
//! Each test binds a real TCP listener on loopback, spawns a server task
//! that walks through a fixed script of expectations and replies, and
//! drives the full client stack (connect handshake included) against it.
//! Both sides run as separate tokio tasks so they can make progress
//! concurrently.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use uae_rsp::packet;
use uae_rsp::{Config, ConnectionState, Debugger, GdbError, Register, WatchKind};

// ---------------------------------------------------------------------------
// Mock target
// ---------------------------------------------------------------------------

enum Action {
    /// Read one framed command, assert its payload, send a framed reply.
    Expect(String, String),
    /// Read one framed command, assert, send nothing (fire-and-forget).
    ExpectSilent(String),
    /// Read one framed binary-write command: assert the textual header,
    /// unescape the rest, assert the raw bytes, send a framed reply.
    ExpectBinaryWrite {
        header: String,
        data: Vec<u8>,
        reply: String,
    },
    /// Expect the raw, unframed interrupt byte; optionally reply.
    Interrupt(Option<String>),
    /// Send an unsolicited framed packet.
    Send(String),
    /// Let the client stew for a bit.
    Sleep(u64),
}

fn expect(cmd: &str, reply: &str) -> Action {
    Action::Expect(cmd.to_string(), reply.to_string())
}

/// The three-step connect handshake every session starts with.
fn handshake() -> Vec<Action> {
    vec![
        expect(
            "qSupported:multiprocess+;swbreak+;hwbreak+",
            "PacketSize=1000;QStartNoAckMode+;swbreak+",
        ),
        expect("QStartNoAckMode", "OK"),
        expect("?", "S05"),
    ]
}

fn test_config() -> Config {
    Config {
        command_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(500),
        interrupt_on_connect: false,
        ..Config::default()
    }
}

/// Read one `$payload#xx` frame, skipping ack bytes.  Binary-safe.
async fn read_frame(sock: &mut TcpStream) -> Vec<u8> {
    let mut byte = [0u8; 1];
    loop {
        sock.read_exact(&mut byte).await.expect("server read");
        match byte[0] {
            b'+' | b'-' => continue,
            b'$' => break,
            other => panic!("unexpected byte {other:#04x} before packet start"),
        }
    }
    let mut payload = Vec::new();
    loop {
        sock.read_exact(&mut byte).await.expect("server read");
        if byte[0] == b'#' {
            break;
        }
        payload.push(byte[0]);
    }
    let mut csum = [0u8; 2];
    sock.read_exact(&mut csum).await.expect("server read");
    payload
}

async fn expect_frame(sock: &mut TcpStream, expected: &[u8]) {
    let payload = read_frame(sock).await;
    assert_eq!(
        payload,
        expected,
        "expected `{}`, got `{}`",
        String::from_utf8_lossy(expected),
        String::from_utf8_lossy(&payload)
    );
}

async fn expect_interrupt(sock: &mut TcpStream) {
    let mut byte = [0u8; 1];
    loop {
        sock.read_exact(&mut byte).await.expect("server read");
        match byte[0] {
            b'+' | b'-' => continue,
            0x03 => return,
            other => panic!("expected interrupt byte, got {other:#04x}"),
        }
    }
}

async fn send_reply(sock: &mut TcpStream, payload: &str) {
    sock.write_all(&packet::frame(payload.as_bytes()))
        .await
        .expect("server write");
}

/// Bind a listener, spawn a task that walks `script` against the first
/// accepted connection, then drains until the client hangs up.
async fn mock_target(script: Vec<Action>) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.expect("accept");
        for action in script {
            match action {
                Action::Expect(cmd, reply) => {
                    expect_frame(&mut sock, cmd.as_bytes()).await;
                    send_reply(&mut sock, &reply).await;
                }
                Action::ExpectSilent(cmd) => {
                    expect_frame(&mut sock, cmd.as_bytes()).await;
                }
                Action::ExpectBinaryWrite {
                    header,
                    data,
                    reply,
                } => {
                    let payload = read_frame(&mut sock).await;
                    assert!(
                        payload.starts_with(header.as_bytes()),
                        "binary write header mismatch: {:?}",
                        String::from_utf8_lossy(&payload)
                    );
                    let escaped = &payload[header.len()..];
                    assert_eq!(packet::unescape_binary(escaped), data);
                    send_reply(&mut sock, &reply).await;
                }
                Action::Interrupt(reply) => {
                    expect_interrupt(&mut sock).await;
                    if let Some(reply) = reply {
                        send_reply(&mut sock, &reply).await;
                    }
                }
                Action::Send(payload) => {
                    send_reply(&mut sock, &payload).await;
                }
                Action::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
            }
        }
        // Script done; swallow trailing acks until the client disconnects.
        let mut buf = [0u8; 256];
        while sock.read(&mut buf).await.map(|n| n > 0).unwrap_or(false) {}
    });

    (addr, handle)
}

async fn connect(script: Vec<Action>) -> (Debugger, JoinHandle<()>) {
    let (addr, server) = mock_target(script).await;
    let dbg = Debugger::connect(addr, test_config()).await.expect("connect");
    (dbg, server)
}

// ---------------------------------------------------------------------------
// Handshake & lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_handshake_reaches_ready() {
    let (dbg, server) = connect(handshake()).await;
    assert_eq!(dbg.connection().state(), ConnectionState::Ready);
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn connect_sends_interrupt_nudge_first() {
    let mut script = vec![Action::Interrupt(None)];
    script.extend(handshake());
    let (addr, server) = mock_target(script).await;

    let config = Config {
        interrupt_on_connect: true,
        settle_delay: Duration::from_millis(10),
        command_timeout: Duration::from_millis(500),
        ..Config::default()
    };
    let dbg = Debugger::connect(addr, config).await.expect("connect");
    assert_eq!(dbg.connection().state(), ConnectionState::Ready);
    dbg.disconnect().await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Registers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_registers_parses_pc_from_image_tail() {
    let mut image = "0".repeat(136);
    image.push_str("00fc0804");
    let mut script = handshake();
    script.push(Action::Expect("g".into(), image));

    let (dbg, server) = connect(script).await;
    let file = dbg.read_registers().await.expect("read registers");
    assert_eq!(file.pc(), 0x00fc_0804);
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn short_register_image_is_a_protocol_error() {
    let mut script = handshake();
    script.push(expect("g", "0123abcd"));

    let (dbg, server) = connect(script).await;
    let err = dbg.read_registers().await.unwrap_err();
    assert!(matches!(
        err,
        GdbError::ReplyTooShort {
            expected: 144,
            actual: 8
        }
    ));
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn single_register_read_and_write() {
    let mut script = handshake();
    script.push(expect("p11", "00fc0800")); // PC is positional index 0x11
    script.push(expect("P0=00000001", "OK"));
    script.push(expect("P11=00001000", "OK"));

    let (dbg, server) = connect(script).await;
    assert_eq!(dbg.read_register(Register::Pc).await.unwrap(), 0x00fc_0800);
    dbg.write_register_set(&[(Register::D0, 1), (Register::Pc, 0x1000)])
        .await
        .expect("write register set");
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn register_write_rejection_names_the_register() {
    let mut script = handshake();
    script.push(expect("P10=00000000", "E03"));

    let (dbg, server) = connect(script).await;
    let err = dbg.write_register(Register::Sr, 0).await.unwrap_err();
    match err {
        GdbError::Target { context, code } => {
            assert!(context.contains("SR"), "context was {context:?}");
            assert_eq!(code, 3);
        }
        other => panic!("expected target error, got {other}"),
    }
    dbg.disconnect().await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_memory_decodes_hex_reply() {
    let mut script = handshake();
    script.push(expect("m1000,4", "deadbeef"));

    let (dbg, server) = connect(script).await;
    let bytes = dbg.read_memory(0x1000, 4).await.expect("read memory");
    assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn read_memory_error_names_the_address() {
    let mut script = handshake();
    script.push(expect("m1000,4", "E01"));

    let (dbg, server) = connect(script).await;
    let err = dbg.read_memory(0x1000, 4).await.unwrap_err();
    match err {
        GdbError::Target { context, code } => {
            assert!(context.contains("0x1000"), "context was {context:?}");
            assert_eq!(code, 1);
        }
        other => panic!("expected target error, got {other}"),
    }
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn write_memory_chunks_with_increasing_addresses() {
    // 300 bytes at 0x2000 with a 256-byte chunk: M at 0x2000 len 0x100,
    // then M at 0x2100 len 0x2c.
    let data = vec![0xabu8; 300];
    let mut script = handshake();
    script.push(Action::Expect(
        format!("M2000,100:{}", "ab".repeat(256)),
        "OK".into(),
    ));
    script.push(Action::Expect(
        format!("M2100,2c:{}", "ab".repeat(44)),
        "OK".into(),
    ));

    let (dbg, server) = connect(script).await;
    dbg.write_memory(0x2000, &data).await.expect("write memory");
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_chunk_falls_back_to_binary_write() {
    // Payload contains every byte the framing layer reserves.
    let data = vec![0x01, 0x23, 0x24, 0x7d, 0xff];
    let mut script = handshake();
    script.push(Action::Expect(
        format!("M4000,5:{}", hex::encode(&data)),
        "E01".into(),
    ));
    script.push(Action::ExpectBinaryWrite {
        header: "X4000,5:".into(),
        data: data.clone(),
        reply: "OK".into(),
    });

    let (dbg, server) = connect(script).await;
    dbg.write_memory(0x4000, &data).await.expect("write memory");
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn failed_chunk_aborts_the_whole_write() {
    // First chunk fails both variants; chunk #2 must never be issued.
    let data = vec![0x55u8; 300];
    let mut script = handshake();
    script.push(Action::Expect(
        format!("M2000,100:{}", "55".repeat(256)),
        "E0e".into(),
    ));
    script.push(Action::ExpectBinaryWrite {
        header: "X2000,100:".into(),
        data: vec![0x55u8; 256],
        reply: "E0e".into(),
    });

    let (dbg, server) = connect(script).await;
    let err = dbg.write_memory(0x2000, &data).await.unwrap_err();
    match err {
        GdbError::Target { context, code } => {
            assert!(context.contains("0x2000"), "context was {context:?}");
            assert_eq!(code, 0x0e);
        }
        other => panic!("expected target error, got {other}"),
    }
    dbg.disconnect().await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Breakpoints & watchpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn breakpoint_set_and_clear() {
    let mut script = handshake();
    script.push(expect("Z0,4000,2", "OK"));
    script.push(expect("z0,4000,2", "OK"));

    let (dbg, server) = connect(script).await;
    dbg.set_breakpoint(0x4000).await.expect("set breakpoint");
    dbg.clear_breakpoint(0x4000).await.expect("clear breakpoint");
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_breakpoint_names_the_address() {
    let mut script = handshake();
    script.push(expect("Z0,4000,2", "E01"));

    let (dbg, server) = connect(script).await;
    let err = dbg.set_breakpoint(0x4000).await.unwrap_err();
    match err {
        GdbError::Target { context, .. } => {
            assert!(context.contains("0x4000"), "context was {context:?}");
        }
        other => panic!("expected target error, got {other}"),
    }
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn watchpoint_kinds_map_to_wire_tags() {
    let mut script = handshake();
    script.push(expect("Z2,d000,4", "OK"));
    script.push(expect("Z3,d000,4", "OK"));
    script.push(expect("Z4,d000,4", "OK"));
    script.push(expect("z2,d000,4", "OK"));

    let (dbg, server) = connect(script).await;
    dbg.set_watchpoint(0xd000, 4, WatchKind::Write).await.unwrap();
    dbg.set_watchpoint(0xd000, 4, WatchKind::Read).await.unwrap();
    dbg.set_watchpoint(0xd000, 4, WatchKind::Access).await.unwrap();
    dbg.clear_watchpoint(0xd000, 4, WatchKind::Write).await.unwrap();
    dbg.disconnect().await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Execution control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn continue_is_fire_and_forget_and_stop_is_captured() {
    let mut script = handshake();
    script.push(Action::ExpectSilent("vCont;c".into()));
    script.push(Action::Sleep(50));
    script.push(Action::Send("S05".into()));

    let (dbg, server) = connect(script).await;
    dbg.resume().await.expect("resume");
    assert_eq!(dbg.connection().state(), ConnectionState::Running);

    // The unsolicited stop lands in the async slot and is consumed here.
    let stop = dbg
        .wait_for_stop(Duration::from_secs(1))
        .await
        .expect("wait for stop");
    assert_eq!(stop.signal, 5);
    assert_eq!(dbg.connection().state(), ConnectionState::Ready);

    // No stale value: a second wait has nothing to consume.
    let err = dbg.wait_for_stop(Duration::from_millis(100)).await;
    assert!(matches!(err, Err(GdbError::Timeout { .. })));

    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn step_waits_for_the_stop_reply() {
    let mut script = handshake();
    script.push(expect("vCont;s", "T05swbreak:;"));

    let (dbg, server) = connect(script).await;
    let stop = dbg.step().await.expect("step");
    assert_eq!(stop.signal, 5);
    assert_eq!(stop.raw, "T05swbreak:;");
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn pause_interrupts_a_running_target() {
    let mut script = handshake();
    script.push(Action::ExpectSilent("vCont;c".into()));
    script.push(Action::Interrupt(Some("S02".into())));

    let (dbg, server) = connect(script).await;
    dbg.resume().await.expect("resume");
    let stop = dbg.pause().await.expect("pause");
    assert_eq!(stop.signal, 2);
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn pause_on_a_halted_target_stays_off_the_wire() {
    let (dbg, server) = connect(handshake()).await;
    // The script holds no further replies: had pause gone to the wire it
    // would time out instead of returning the synthetic stop.
    let stop = dbg.pause().await.expect("pause");
    assert_eq!(stop.signal, 0);
    dbg.disconnect().await;
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Monitor tunnel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn monitor_command_roundtrips_hex_text() {
    let mut script = handshake();
    // "reset" hex-encoded out, "OK\n" hex-encoded back.
    script.push(expect("qRcmd,7265736574", "4f4b0a"));

    let (dbg, server) = connect(script).await;
    let output = dbg.monitor("reset").await.expect("monitor");
    assert_eq!(output, "OK\n");
    dbg.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn monitor_error_reply_is_surfaced() {
    let mut script = handshake();
    script.push(expect("qRcmd,6f6f7073", "E02"));

    let (dbg, server) = connect(script).await;
    let err = dbg.monitor("oops").await.unwrap_err();
    match err {
        GdbError::Target { context, code } => {
            assert!(context.contains("oops"), "context was {context:?}");
            assert_eq!(code, 2);
        }
        other => panic!("expected target error, got {other}"),
    }
    dbg.disconnect().await;
    server.await.unwrap();
}
