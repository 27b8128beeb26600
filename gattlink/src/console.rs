//! Interactive console on a readiness-driven descriptor.
//!
//! The console reads its input once each time the event loop reports it
//! readable, splits the bytes into newline-terminated lines and hands each
//! complete line to a [`CommandHandler`]. End of input, a hang-up or an
//! error stops the loop.
//!
//! The input keeps its blocking mode. Standard input shares its file status
//! flags with the terminal's other streams, so they are left alone; a single
//! read after a readiness report does not block, and anything it leaves
//! queued is reported again on the next pass.

use std::io::{self, ErrorKind, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};

use crate::event_loop::{Interest, LoopContext, Readiness};
use crate::trace::{debug, error, trace};

/// Prompt printed before each line is read.
pub const PROMPT: &str = "[GATT client]# ";

/// Interest mask the console registers with.
pub const CONSOLE_INTEREST: Interest = Interest::ALL;

const READ_CHUNK: usize = 1024;

/// Receives complete console lines.
pub trait CommandHandler {
    /// Called once per line, without its newline terminator.
    fn handle_line(&mut self, line: &[u8]);
}

impl<F: FnMut(&[u8])> CommandHandler for F {
    fn handle_line(&mut self, line: &[u8]) {
        self(line);
    }
}

/// Placeholder command processor: echoes each line back.
pub struct EchoCommands<W> {
    out: W,
}

impl<W: Write> EchoCommands<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> CommandHandler for EchoCommands<W> {
    fn handle_line(&mut self, line: &[u8]) {
        let result = writeln!(self.out, "  Typed line: {}", String::from_utf8_lossy(line))
            .and_then(|()| self.out.flush());
        if let Err(e) = result {
            error!(error = %e, "failed to echo console line");
        }
    }
}

/// Accumulates raw input and yields newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete line, without its `\n`.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        Some(line)
    }

    /// Removes and returns any unterminated remainder.
    pub fn take_partial(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of one read from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Data,
    Retry,
    EndOfInput,
}

/// Line-oriented console bound to one input descriptor.
pub struct Console<F, H, W> {
    input: F,
    lines: LineBuffer,
    handler: H,
    out: W,
}

impl<F: AsFd, H: CommandHandler, W: Write> Console<F, H, W> {
    /// Creates a console reading from `input` and printing the prompt to
    /// `out`.
    pub fn new(input: F, handler: H, out: W) -> Self {
        Self {
            input,
            lines: LineBuffer::new(),
            handler,
            out,
        }
    }

    /// Prints the prompt.
    pub fn print_prompt(&mut self) {
        let result = self
            .out
            .write_all(PROMPT.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(e) = result {
            error!(error = %e, "failed to print prompt");
        }
    }

    /// Readiness callback body.
    ///
    /// Delivers every complete line read so far, then stops the loop on end
    /// of input, hang-up, or error.
    pub fn on_ready(&mut self, ctx: &mut LoopContext<'_>, readiness: Readiness) {
        trace!(%readiness, "console readiness");

        if readiness.is_readable() || readiness.is_peer_closed() {
            match self.read_once() {
                // Keep reading on later passes until end of input, even if
                // the writer already hung up.
                Ok(Input::Data) => return,
                Ok(Input::Retry) => {}
                Ok(Input::EndOfInput) => {
                    if let Some(line) = self.lines.take_partial() {
                        self.handler.handle_line(&line);
                    }
                    debug!("console reached end of input");
                    ctx.stop();
                    return;
                }
                Err(e) => {
                    error!(error = %e, "failed to read console input");
                    ctx.stop();
                    return;
                }
            }
        }

        if readiness.is_closing() {
            debug!(%readiness, "console closed");
            ctx.stop();
        }
    }

    /// Performs one read, dispatching any complete lines.
    fn read_once(&mut self) -> io::Result<Input> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match rustix::io::read(&self.input, &mut chunk[..]) {
            Ok(0) => return Ok(Input::EndOfInput),
            Ok(n) => n,
            Err(e) => {
                let e = io::Error::from(e);
                return match e.kind() {
                    ErrorKind::WouldBlock | ErrorKind::Interrupted => Ok(Input::Retry),
                    _ => Err(e),
                };
            }
        };

        self.lines.extend(&chunk[..n]);
        while let Some(line) = self.lines.next_line() {
            self.handler.handle_line(&line);
            self.print_prompt();
        }
        Ok(Input::Data)
    }
}

impl<F: AsFd, H, W> AsRawFd for Console<F, H, W> {
    fn as_raw_fd(&self) -> RawFd {
        self.input.as_fd().as_raw_fd()
    }
}
