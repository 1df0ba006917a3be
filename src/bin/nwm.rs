#[macro_use]
extern crate log;

/// A default 'anyhow' based result type
type Result<T> = anyhow::Result<T>;

use std::{
    fs::File,
    io::{self, BufRead, ErrorKind, Read, Write},
    os::unix::io::AsRawFd,
    path::PathBuf,
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
};

use anyhow::Context;
use clap::Parser;
use mio::{unix::SourceFd, Events, Interest, Poll, Token, Waker};
use nwm::{
    ipc::{self, Command, WmEvent},
    Config, WindowManager, XConn, XcbConnection,
};
use simplelog::{LevelFilter, WriteLogger};

const X_TOKEN: Token = Token(0);
const CONTROLLER_TOKEN: Token = Token(1);

/// Manage X11 windows, leaving every layout decision to a controller on stdin / stdout
#[derive(Parser)]
#[command(name = "nwm")]
#[command(version)]
struct Args {
    /// X display to connect to, defaults to $DISPLAY
    #[arg(short, long)]
    display: Option<String>,

    /// Log verbosity: off, error, warn, info, debug or trace
    #[arg(short, long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,

    /// Write the log here instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_level(s: &str) -> std::result::Result<LevelFilter, String> {
    s.parse().map_err(|_| format!("{:?} is not a log level", s))
}

fn init_logging(args: &Args) -> Result<()> {
    let config = simplelog::Config::default();
    match &args.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("unable to create log file {}", path.display()))?;
            WriteLogger::init(args.log_level, config, file)?
        }
        None => WriteLogger::init(args.log_level, config, io::stderr())?,
    }

    Ok(())
}

// Longest command line accepted from the controller.
const MAX_LINE: u64 = 4096;

/// Parse controller commands from `input` one line at a time, handing each to `deliver` until
/// it returns false or the input ends. Over-long and malformed lines are logged and skipped.
fn read_commands<R: BufRead>(
    mut input: R,
    mut deliver: impl FnMut(Command) -> bool,
) -> io::Result<()> {
    let mut line = Vec::new();
    let mut discarding = false;
    loop {
        line.clear();
        let n = (&mut input).take(MAX_LINE).read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(());
        }
        let complete = line.last() == Some(&b'\n');
        if discarding {
            discarding = !complete;
            continue;
        }
        if !complete && n as u64 == MAX_LINE {
            warn!("dropping controller line longer than {} bytes", MAX_LINE);
            discarding = true;
            continue;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match text.parse::<Command>() {
            Ok(cmd) => {
                if !deliver(cmd) {
                    return Ok(());
                }
            }
            Err(e) => warn!("ignoring controller command {:?}: {:#}", text, e),
        }
    }
}

/// Read stdin on its own thread so a slow controller never holds up X events. The poll is woken
/// for every command and once more when stdin closes.
fn spawn_command_reader(waker: Waker) -> Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        let result = read_commands(stdin.lock(), |cmd| {
            tx.send(cmd).is_ok() && waker.wake().is_ok()
        });
        if let Err(e) = result {
            error!("unable to read controller commands: {}", e);
        }
        drop(tx);
        if let Err(e) = waker.wake() {
            warn!("unable to wake the event loop: {}", e);
        }
    });
    rx
}

fn forward_events(rx: &Receiver<WmEvent>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for event in rx.try_iter() {
        writeln!(out, "{}", event)?;
    }
    out.flush().context("unable to write events to the controller")
}

fn run(args: Args) -> Result<()> {
    let conn = XcbConnection::new(args.display.as_deref())?;
    let x_fd = conn.as_raw_fd();
    let (sink, rx) = ipc::channel();
    let mut wm = WindowManager::new(conn, Config::default(), Box::new(sink));
    wm.init()?;
    forward_events(&rx)?;

    let mut poll = Poll::new().context("Failed to create mio Poll")?;
    poll.registry()
        .register(&mut SourceFd(&x_fd), X_TOKEN, Interest::READABLE)
        .context("Failed to register X11 FD with mio")?;
    let waker =
        Waker::new(poll.registry(), CONTROLLER_TOKEN).context("Failed to create mio Waker")?;
    let commands = spawn_command_reader(waker);

    let mut events = Events::with_capacity(8);
    loop {
        // replies to our own requests can leave events queued without the socket waking us
        wm.dispatch();
        wm.conn().check()?;
        forward_events(&rx)?;

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(e).context("X11 socket poll failed");
        }

        if !events.iter().any(|e| e.token() == CONTROLLER_TOKEN) {
            continue;
        }
        loop {
            match commands.try_recv() {
                Ok(cmd) => {
                    debug!("controller command: {:?}", cmd);
                    wm.apply(cmd);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("controller closed stdin, exiting");
                    return Ok(());
                }
            }
        }
        wm.conn().flush();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    info!("starting nwm");

    if let Err(e) = run(args) {
        error!("{:#}", e);
        return Err(e);
    }

    Ok(())
}
