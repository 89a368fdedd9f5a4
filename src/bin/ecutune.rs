//! Interactive terminal front-end for the ECU tuner.
//!
//! ## Usage
//!
//! ```bash
//! # List available serial ports
//! cargo run --bin ecutune -- --list-ports
//!
//! # Connect to the default port (COM5)
//! cargo run --bin ecutune
//!
//! # Connect to a specific port, dumping every byte on the wire
//! cargo run --bin ecutune -- --port /dev/ttyUSB0 --trace
//! ```
//!
//! Type `help` at the prompt for commands. The port is polled before every
//! prompt; completed responses are printed as they arrive, and a reply with
//! no line ending is printed raw.

use std::io::{self, BufRead, Write};

use ecutune::port::{self, DEFAULT_PORT};
use ecutune::table::{COLS, ROWS};
use ecutune::{Command, LinkState, Session, TableKind};

const HELP: &str = "\
Commands:
  connect [port]                   Open the port (default: current port)
  disconnect                       Close the port
  status                           Connection state and last response
  req | start | stop               Send <REQ>, <START>, <STOP>
  send <text>                      Send text verbatim
  show <fuel|throttle>             Print a table
  set <fuel|throttle> <row> <col> <value>
  fill <fuel|throttle> <value>     Set every cell
  push <fuel|throttle>             Send a table to the ECU
  save <fuel|throttle> <file>      Write a table as JSON (feature `json`)
  load <fuel|throttle> <file>      Read a table from JSON (feature `json`)
  help                             This text
  exit                             Quit";

struct Options {
    port: String,
    list_ports: bool,
    trace: bool,
    connect: bool,
}

fn parse_args() -> Result<Options, String> {
    let mut opts = Options {
        port: DEFAULT_PORT.to_string(),
        list_ports: false,
        trace: false,
        connect: true,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => opts.port = args.next().ok_or("--port needs a value")?,
            "--list-ports" => opts.list_ports = true,
            "--trace" => opts.trace = true,
            "--no-connect" => opts.connect = false,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(opts)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = parse_args()?;

    if opts.list_ports {
        for name in port::list_ports()? {
            println!("{name}");
        }
        return Ok(());
    }

    let mut session = Session::new();
    session.set_port_name(opts.port);

    if opts.trace {
        let conn = session.connection_mut();
        conn.set_on_send(|b| println!(">> {}", String::from_utf8_lossy(b)));
        conn.set_on_recv(|b| println!("<< {}", String::from_utf8_lossy(b)));
    }

    if opts.connect {
        if let Err(e) = session.connect() {
            eprintln!("Could not open {}: {e}", session.port_name());
        }
    }

    println!("ECU Tuner ({}). Type 'help' for commands.", session.state());

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        match session.poll_display() {
            Ok(responses) => {
                for r in responses {
                    println!("<- {r}");
                }
            }
            Err(e) => eprintln!("Receive failed: {e}"),
        }

        print!("{}> ", prompt(&session));
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if matches!(words[0], "exit" | "quit") {
            break;
        }
        if let Err(e) = run_command(&mut session, &line, &words) {
            eprintln!("Error: {e}");
        }
    }

    session.disconnect();
    Ok(())
}

fn prompt(session: &Session) -> String {
    match session.state() {
        LinkState::Connected => session.port_name().to_string(),
        LinkState::Disconnected => "offline".to_string(),
    }
}

fn run_command(
    session: &mut Session,
    line: &str,
    words: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    match words[0] {
        "help" => println!("{HELP}"),
        "connect" => {
            if let Some(name) = words.get(1) {
                session.set_port_name(*name);
            }
            session.connect()?;
            println!("[Connected] {}", session.port_name());
        }
        "disconnect" => {
            if session.disconnect() {
                println!("[Disconnected]");
            } else {
                println!("Not connected");
            }
        }
        "status" => {
            println!("Port: {} [{}]", session.port_name(), session.state());
            println!("Last response: {}", session.last_response());
        }
        "req" => send(session, &Command::RequestData)?,
        "start" => send(session, &Command::Start)?,
        "stop" => send(session, &Command::Stop)?,
        "send" => {
            let text = line.trim_start().strip_prefix("send").unwrap_or_default().trim();
            send(session, &Command::manual(text)?)?;
        }
        "show" => {
            let kind = table_kind(words.get(1))?;
            print!("{}", session.table(kind).display(kind));
        }
        "set" => {
            let kind = table_kind(words.get(1))?;
            let (row, col, value) = match &words[2..] {
                [row, col, value] => {
                    (row.parse::<usize>()?, col.parse::<usize>()?, value.parse::<f32>()?)
                }
                _ => return Err("usage: set <fuel|throttle> <row> <col> <value>".into()),
            };
            if !session.table_mut(kind).set(row, col, value) {
                return Err(format!("cell out of range (rows 0..{ROWS}, cols 0..{COLS})").into());
            }
        }
        "fill" => {
            let kind = table_kind(words.get(1))?;
            let value: f32 = words.get(2).ok_or("usage: fill <fuel|throttle> <value>")?.parse()?;
            session.table_mut(kind).fill(value);
        }
        "push" => {
            let kind = table_kind(words.get(1))?;
            match session.send_table(kind)? {
                Some(n) => println!("Sent {kind} table ({n} bytes)"),
                None => println!("Not connected; nothing sent"),
            }
        }
        #[cfg(feature = "json")]
        "save" => {
            let kind = table_kind(words.get(1))?;
            let path = words.get(2).ok_or("usage: save <fuel|throttle> <file>")?;
            session.table(kind).save(path)?;
            println!("Saved {kind} table to {path}");
        }
        #[cfg(feature = "json")]
        "load" => {
            let kind = table_kind(words.get(1))?;
            let path = words.get(2).ok_or("usage: load <fuel|throttle> <file>")?;
            *session.table_mut(kind) = ecutune::CalibrationTable::load(path)?;
            println!("Loaded {kind} table from {path}");
        }
        #[cfg(not(feature = "json"))]
        "save" | "load" => return Err("built without the `json` feature".into()),
        other => return Err(format!("unknown command '{other}' (try 'help')").into()),
    }
    Ok(())
}

fn send(session: &mut Session, cmd: &Command) -> Result<(), Box<dyn std::error::Error>> {
    match session.send_command(cmd)? {
        Some(_) => log::debug!("sent {}", cmd.debug_text()),
        None => println!("Not connected; nothing sent"),
    }
    Ok(())
}

fn table_kind(word: Option<&&str>) -> Result<TableKind, String> {
    let word = word.ok_or("expected a table name: fuel or throttle")?;
    TableKind::from_name(word).ok_or_else(|| format!("unknown table '{word}' (fuel or throttle)"))
}
