//! Entry point for the `uae-rsp` command-line debugger.
//!
//! Parses CLI arguments, connects to the emulator's GDB server, runs one
//! operation, and prints the raw result.  All protocol work is delegated
//! to the library; `main.rs` owns only process setup (logging, argument
//! parsing) and plain-text output.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uae_rsp::{Config, Debugger, Register, WatchKind};

/// Remote-debug an emulated Amiga over the GDB serial protocol.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Address of the emulator's GDB server.
    #[arg(short, long, default_value = "127.0.0.1:2345")]
    addr: String,

    /// Per-command timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Skip the interrupt nudge normally sent right after connecting.
    #[arg(long)]
    no_interrupt: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Dump all CPU registers.
    Regs,
    /// Read one register.
    Reg { register: Register },
    /// Set one register.
    Poke { register: Register, value: String },
    /// Read LEN bytes of memory at ADDR.
    Read { addr: String, len: u32 },
    /// Write hex-encoded BYTES at ADDR.
    Write { addr: String, bytes: String },
    /// Set a software breakpoint.
    Break { addr: String },
    /// Clear a software breakpoint.
    Unbreak { addr: String },
    /// Set a watchpoint over LEN bytes (kind: write|read|access).
    Watch {
        addr: String,
        len: u32,
        #[arg(default_value = "write")]
        kind: WatchKind,
    },
    /// Clear a watchpoint.
    Unwatch {
        addr: String,
        len: u32,
        #[arg(default_value = "write")]
        kind: WatchKind,
    },
    /// Single-step one instruction.
    Step,
    /// Resume execution; does not wait for the target to stop.
    Continue,
    /// Interrupt a running target.
    Pause,
    /// Block until the target halts.
    Wait {
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
    },
    /// Send a vendor monitor command (qRcmd).
    Monitor { command: Vec<String> },
}

/// Accept `4000`, `0x4000`, or `$4000`.
fn parse_addr(s: &str) -> Result<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('$'))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).with_context(|| format!("`{s}` is not a hex address"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = Config {
        command_timeout: Duration::from_millis(cli.timeout_ms),
        interrupt_on_connect: !cli.no_interrupt,
        ..Config::default()
    };

    let dbg = Debugger::connect(cli.addr.as_str(), config)
        .await
        .with_context(|| format!("connecting to {}", cli.addr))?;

    match cli.command {
        Cmd::Regs => {
            let file = dbg.read_registers().await?;
            for register in Register::ALL {
                println!("{register} = {:08x}", file.get(register));
            }
        }
        Cmd::Reg { register } => {
            let value = dbg.read_register(register).await?;
            println!("{register} = {value:08x}");
        }
        Cmd::Poke { register, value } => {
            let value = parse_addr(&value)?;
            dbg.write_register(register, value).await?;
            println!("{register} = {value:08x}");
        }
        Cmd::Read { addr, len } => {
            let addr = parse_addr(&addr)?;
            let bytes = dbg.read_memory(addr, len).await?;
            println!("{}", hex::encode(bytes));
        }
        Cmd::Write { addr, bytes } => {
            let addr = parse_addr(&addr)?;
            let data = hex::decode(bytes.trim()).context("BYTES must be an even hex string")?;
            dbg.write_memory(addr, &data).await?;
            println!("wrote {} bytes at {addr:#x}", data.len());
        }
        Cmd::Break { addr } => {
            let addr = parse_addr(&addr)?;
            dbg.set_breakpoint(addr).await?;
            println!("breakpoint set at {addr:#x}");
        }
        Cmd::Unbreak { addr } => {
            let addr = parse_addr(&addr)?;
            dbg.clear_breakpoint(addr).await?;
            println!("breakpoint cleared at {addr:#x}");
        }
        Cmd::Watch { addr, len, kind } => {
            let addr = parse_addr(&addr)?;
            dbg.set_watchpoint(addr, len, kind).await?;
            println!("watchpoint set at {addr:#x} len {len}");
        }
        Cmd::Unwatch { addr, len, kind } => {
            let addr = parse_addr(&addr)?;
            dbg.clear_watchpoint(addr, len, kind).await?;
            println!("watchpoint cleared at {addr:#x} len {len}");
        }
        Cmd::Step => {
            let stop = dbg.step().await?;
            println!("stopped: {stop}");
        }
        Cmd::Continue => {
            dbg.resume().await?;
            println!("running");
        }
        Cmd::Pause => {
            let stop = dbg.pause().await?;
            println!("stopped: {stop}");
        }
        Cmd::Wait { timeout_ms } => {
            let stop = dbg.wait_for_stop(Duration::from_millis(timeout_ms)).await?;
            println!("stopped: {stop}");
        }
        Cmd::Monitor { command } => {
            let output = dbg.monitor(&command.join(" ")).await?;
            if !output.is_empty() {
                print!("{output}");
            }
        }
    }

    dbg.disconnect().await;
    Ok(())
}
