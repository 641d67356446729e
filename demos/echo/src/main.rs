//! Minimal echo server/client driving `myra-transport` directly: a worked
//! example for external collaborators, not part of the library.
//!
//! ```text
//! myra-echo serve 127.0.0.1:3456 [--mode sqpoll] [--fixed-buffers 16,4096]
//! myra-echo connect 127.0.0.1:3456 "hello"
//! ```
//!
//! No argument-parsing crate is used; the surface is small enough that
//! `std::env::args` suffices.

use std::net::SocketAddr;
use std::process::ExitCode;

use myra_transport::{Config, DriverEvent, Mode, Transport, TransportError};

/// Setup failed before any ring traffic flowed: bad arguments, bind
/// failure, ring registration failure. Maps to exit code 1.
struct SetupError(String);

/// Something went wrong after the demo was up and running. Maps to exit
/// code 2.
struct RuntimeError(String);

impl From<TransportError> for RuntimeError {
    fn from(e: TransportError) -> Self {
        RuntimeError(e.to_string())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let parsed = match parse_args(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e.0);
            eprintln!("usage: myra-echo <serve|connect> <addr> [message] [--mode direct|sqpoll|token] [--fixed-buffers count,size] [--buffer-ring group,count,size] [--max-frame-bytes n]");
            return ExitCode::from(1);
        }
    };

    let result = match parsed.command {
        Command::Serve => run_server(parsed.addr, parsed.config),
        Command::Connect => run_client(parsed.addr, parsed.config, parsed.message),
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("runtime error: {}", e.0);
            ExitCode::from(2)
        }
    }
}

enum Command {
    Serve,
    Connect,
}

struct Parsed {
    command: Command,
    addr: SocketAddr,
    message: String,
    config: Config,
}

fn parse_args(args: &[String]) -> Result<Parsed, SetupError> {
    if args.len() < 3 {
        return Err(SetupError("missing command or address".into()));
    }

    let command = match args[1].as_str() {
        "serve" => Command::Serve,
        "connect" => Command::Connect,
        other => return Err(SetupError(format!("unknown command {other:?}"))),
    };

    let addr: SocketAddr = args[2]
        .parse()
        .map_err(|e| SetupError(format!("invalid address {:?}: {e}", args[2])))?;

    let mut message = String::from("ping");
    let mut builder = Config::builder();
    let mut flags_start = 3;

    if matches!(command, Command::Connect) {
        if args.len() < 4 {
            return Err(SetupError("connect requires a message argument".into()));
        }
        message = args[3].clone();
        flags_start = 4;
    }

    let mut i = flags_start;
    while i < args.len() {
        match args[i].as_str() {
            "--mode" => {
                let value = args.get(i + 1).ok_or_else(|| SetupError("--mode needs a value".into()))?;
                let mode = match value.as_str() {
                    "direct" => Mode::Direct,
                    "sqpoll" => Mode::Sqpoll,
                    "token" => Mode::Token,
                    other => return Err(SetupError(format!("unknown mode {other:?}"))),
                };
                builder.mode(mode);
                i += 2;
            }
            "--fixed-buffers" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| SetupError("--fixed-buffers needs count,size".into()))?;
                let (count, size) = parse_pair(value)?;
                builder.fixed_buffers(count, size);
                i += 2;
            }
            "--buffer-ring" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| SetupError("--buffer-ring needs group,count,size".into()))?;
                let parts: Vec<&str> = value.split(',').collect();
                if parts.len() != 3 {
                    return Err(SetupError("--buffer-ring needs group,count,size".into()));
                }
                let group_id: u16 = parts[0]
                    .parse()
                    .map_err(|_| SetupError("invalid group id".into()))?;
                let count: u16 = parts[1].parse().map_err(|_| SetupError("invalid count".into()))?;
                let size: u32 = parts[2].parse().map_err(|_| SetupError("invalid size".into()))?;
                builder.buffer_ring(group_id, count, size);
                i += 2;
            }
            "--max-frame-bytes" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| SetupError("--max-frame-bytes needs a value".into()))?;
                let n: u32 = value.parse().map_err(|_| SetupError("invalid max-frame-bytes".into()))?;
                builder.max_frame_bytes(n);
                i += 2;
            }
            other => return Err(SetupError(format!("unknown flag {other:?}"))),
        }
    }

    // Neither buffer mode was requested on the command line; fall back to a
    // small fixed-buffer pool so the demo runs out of the box.
    let config = builder.build();
    let config = if config.fixed_buffers().is_none() && config.buffer_ring().is_none() {
        let mut b = Config::builder();
        b.fixed_buffers(16, 4096)
            .mode(config.mode())
            .max_frame_bytes(config.max_frame_bytes());
        b.build()
    } else {
        config
    };

    Ok(Parsed {
        command,
        addr,
        message,
        config,
    })
}

fn parse_pair(s: &str) -> Result<(u32, u32), SetupError> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err(SetupError(format!("expected count,size, got {s:?}")));
    }
    let count: u32 = parts[0].parse().map_err(|_| SetupError("invalid count".into()))?;
    let size: u32 = parts[1].parse().map_err(|_| SetupError("invalid size".into()))?;
    Ok((count, size))
}

/// Accepts connections forever, echoing every frame straight back to its
/// sender. One `Transport`, one thread, matching §5.
fn run_server(addr: SocketAddr, config: Config) -> Result<(), RuntimeError> {
    let max_frame = config.max_frame_bytes().min(16 * 1024 * 1024) as usize;
    let mut transport = Transport::new(config)?;
    transport.bind_and_listen(addr, 128)?;
    tracing::info!(%addr, "echo server listening");

    let mut buf = vec![0u8; max_frame];
    loop {
        let events = transport.pump(1)?;
        for event in events {
            match event {
                DriverEvent::Accepted { conn_id } => {
                    tracing::info!(conn_id, "accepted connection");
                }
                DriverEvent::Connected { .. } => {}
                DriverEvent::FrameReady { conn_id } => {
                    while let Some(n) = transport.try_receive(conn_id, &mut buf)? {
                        tracing::debug!(conn_id, bytes = n, "echoing frame");
                        transport.send(conn_id, &buf[..n])?;
                    }
                }
                DriverEvent::ConnectionClosed { conn_id } => {
                    tracing::info!(conn_id, "connection closed");
                }
            }
        }
    }
}

/// Connects, sends one message, waits for the echoed reply, and exits.
fn run_client(addr: SocketAddr, config: Config, message: String) -> Result<(), RuntimeError> {
    let mut transport = Transport::new(config)?;
    let conn = transport.connect(addr)?;
    transport.pump(1)?;

    transport.send(conn, message.as_bytes())?;
    transport.pump(0)?;

    let mut dest = vec![0u8; message.len().max(64)];
    let n = transport.receive(conn, &mut dest)?;
    println!("{}", String::from_utf8_lossy(&dest[..n]));

    transport.close(conn)?;
    for _ in 0..20 {
        let events = transport.pump(1)?;
        if events
            .iter()
            .any(|e| matches!(e, DriverEvent::ConnectionClosed { conn_id } if *conn_id == conn))
        {
            break;
        }
    }

    Ok(())
}
