//! Client session: connect once, then multiplex the channel and console.
//!
//! ```text
//!   Cli ──> ClientConfig ──> adapter::resolve ──> EventLoop::new ──> Connector::connect
//!                                                                        │
//!            ┌───────────────────────────────────────────────────────────┘
//!            ▼
//!   watch_channel(channel) + attach_console(stdin) ──> EventLoop::run
//! ```
//!
//! Setup errors abort the session with a [`ClientError`]. Once the loop is
//! running, a closing channel or console only stops the loop.

use std::io::{self, ErrorKind, Write};
use std::os::fd::{AsFd, AsRawFd};

use crate::adapter::{self, AdapterError};
use crate::config::{Cli, ClientConfig, ConfigError};
use crate::connector::{Channel, ConnectError, Connector, Transport};
use crate::console::{CONSOLE_INTEREST, CommandHandler, Console, EchoCommands};
use crate::event_loop::{EventLoop, Interest, LoopContext, LoopError, Readiness};
use crate::trace::{self, debug, info, warn};

/// Largest packet read from the channel in one call.
const MAX_PDU_SIZE: usize = 65535;

/// Interest mask the channel registers with.
pub const CHANNEL_INTEREST: Interest = Interest::ALL;

/// Error setting up a client session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Loop(#[from] LoopError),
}

/// Runs a session on standard input/output over kernel L2CAP sockets.
///
/// # Errors
///
/// Returns a [`ClientError`] for any setup failure.
pub fn run(cli: Cli) -> Result<(), ClientError> {
    let mut connector = Connector::new();
    run_with(
        cli,
        &mut connector,
        io::stdin(),
        EchoCommands::new(io::stdout()),
        io::stdout(),
    )
}

/// Runs a session with an explicit transport and console.
///
/// Returns once the loop stops: console end-of-input, console hang-up, or
/// channel disconnect.
///
/// # Errors
///
/// Returns a [`ClientError`] for any setup failure. Configuration is
/// validated before the transport is touched.
pub fn run_with<T, F, H, W>(
    cli: Cli,
    connector: &mut Connector<T>,
    input: F,
    handler: H,
    out: W,
) -> Result<(), ClientError>
where
    T: Transport,
    T::Socket: AsFd + 'static,
    F: AsFd + 'static,
    H: CommandHandler + 'static,
    W: Write + 'static,
{
    let config = ClientConfig::try_from(cli)?;
    trace::init_tracing(config.verbose);
    debug!(?config, "configuration");

    let local = adapter::resolve(config.adapter)?;
    let mut event_loop = EventLoop::new()?;

    let channel = connector.connect(&config.connect_params(local))?;
    if let Some(mtu) = channel.mtu() {
        info!(mtu, "ATT MTU requested");
    }
    watch_channel(&mut event_loop, channel)?;

    attach_console(&mut event_loop, Console::new(input, handler, out))?;

    event_loop.run()?;
    info!("session finished");
    Ok(())
}

/// Registers `channel` with the loop.
///
/// Incoming packets are drained and logged. When the peer disconnects the
/// channel is deregistered, closed, and the loop is stopped.
///
/// # Errors
///
/// Returns a [`LoopError`] if registration fails.
pub fn watch_channel<S>(event_loop: &mut EventLoop, channel: Channel<S>) -> Result<(), LoopError>
where
    S: AsFd + 'static,
{
    let fd = channel.as_fd().as_raw_fd();
    let peer = channel.peer();
    let mut buf = vec![0u8; MAX_PDU_SIZE];

    event_loop.register(
        fd,
        CHANNEL_INTEREST,
        move |ctx, readiness| on_channel_ready(&channel, &mut buf, ctx, readiness),
        Some(Box::new(move || debug!(peer = %peer, "channel released"))),
    )
}

fn on_channel_ready<S: AsFd>(
    channel: &Channel<S>,
    buf: &mut [u8],
    ctx: &mut LoopContext<'_>,
    readiness: Readiness,
) {
    let mut disconnected = readiness.is_closing();

    if readiness.is_readable() {
        loop {
            match rustix::io::read(channel, &mut buf[..]) {
                Ok(0) => {
                    disconnected = true;
                    break;
                }
                Ok(n) => {
                    debug!(len = n, pdu = %hex::encode(&buf[..n]), "received ATT PDU");
                }
                Err(e) => {
                    let e = io::Error::from(e);
                    match e.kind() {
                        ErrorKind::WouldBlock => break,
                        ErrorKind::Interrupted => {}
                        _ => {
                            warn!(error = %e, "channel read failed");
                            disconnected = true;
                            break;
                        }
                    }
                }
            }
        }
    }

    if disconnected {
        info!(peer = %channel.peer(), %readiness, "device disconnected");
        if let Err(e) = ctx.deregister_self() {
            warn!(error = %e, "channel already deregistered");
        }
        ctx.stop();
    }
}

/// Registers `console` with the loop and prints the first prompt.
///
/// # Errors
///
/// Returns a [`LoopError`] if registration fails, e.g. when the input is a
/// regular file the poller cannot watch.
pub fn attach_console<F, H, W>(
    event_loop: &mut EventLoop,
    mut console: Console<F, H, W>,
) -> Result<(), LoopError>
where
    F: AsFd + 'static,
    H: CommandHandler + 'static,
    W: Write + 'static,
{
    let fd = console.as_raw_fd();
    console.print_prompt();
    event_loop.register(
        fd,
        CONSOLE_INTEREST,
        move |ctx, readiness| console.on_ready(ctx, readiness),
        None,
    )
}
