//! End-to-end client sessions over a scripted transport.
//!
//! The transport hands out one end of a Unix socket pair as the "L2CAP"
//! socket and keeps the other end as the remote device. The console reads
//! from another socket pair instead of standard input.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use gattlink::client::{self, ClientError};
use gattlink::config::{Cli, ConfigError};
use gattlink::connector::{Connector, Transport};
use gattlink::net::{DeviceAddress, PeerAddress, SecurityLevel};

/// Socket-pair transport that records what the connector asked for.
#[derive(Default)]
struct PairTransport {
    allocated: usize,
    bound: Option<DeviceAddress>,
    security: Option<SecurityLevel>,
    peer: Option<PeerAddress>,
    /// Remote ends of allocated sockets.
    remotes: Vec<UnixStream>,
    /// Drop the remote end as soon as the channel is ready.
    disconnect_after_connect: bool,
    refuse_connect: bool,
    /// Sent by the remote end once the channel is ready.
    first_pdu: Option<Vec<u8>>,
}

impl Transport for PairTransport {
    type Socket = UnixStream;

    fn allocate(&mut self) -> io::Result<UnixStream> {
        self.allocated += 1;
        let (local, remote) = UnixStream::pair()?;
        self.remotes.push(remote);
        Ok(local)
    }

    fn bind(&mut self, _socket: &UnixStream, local: DeviceAddress) -> io::Result<()> {
        self.bound = Some(local);
        Ok(())
    }

    fn set_security(&mut self, _socket: &UnixStream, level: SecurityLevel) -> io::Result<()> {
        self.security = Some(level);
        Ok(())
    }

    fn connect(&mut self, _socket: &UnixStream, peer: PeerAddress) -> io::Result<()> {
        self.peer = Some(peer);
        if self.refuse_connect {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        Ok(())
    }

    fn prepare(&mut self, socket: &UnixStream) -> io::Result<()> {
        socket.set_nonblocking(true)?;
        if let (Some(pdu), Some(remote)) = (&self.first_pdu, self.remotes.last()) {
            (&*remote).write_all(pdu)?;
        }
        if self.disconnect_after_connect {
            self.remotes.clear();
        }
        Ok(())
    }
}

/// Cloneable in-memory writer.
#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("gattlink-client").chain(args.iter().copied())).unwrap()
}

type Lines = Rc<RefCell<Vec<Vec<u8>>>>;

fn recorder() -> (Lines, impl FnMut(&[u8]) + 'static) {
    let lines: Lines = Rc::default();
    let sink = Rc::clone(&lines);
    (lines, move |line: &[u8]| sink.borrow_mut().push(line.to_vec()))
}

#[test]
fn typed_line_is_delivered_once_and_eof_ends_session() {
    let mut connector = Connector::with_transport(PairTransport::default());
    let (console_tx, console_rx) = UnixStream::pair().unwrap();
    let (lines, handler) = recorder();
    let out = SharedBuf::default();

    (&console_tx).write_all(b"hello device\n").unwrap();
    drop(console_tx);

    let result = client::run_with(
        cli(&["-d", "AA:BB:CC:DD:EE:FF", "-t", "public", "-s", "low"]),
        &mut connector,
        console_rx,
        handler,
        out.clone(),
    );

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(*lines.borrow(), [b"hello device".to_vec()]);

    let transport = connector.transport();
    assert_eq!(transport.allocated, 1);
    assert_eq!(transport.bound, Some(DeviceAddress::ANY));
    assert_eq!(transport.security, Some(SecurityLevel::Low));
    assert_eq!(
        transport.peer.map(|p| p.addr.to_string()),
        Some("AA:BB:CC:DD:EE:FF".to_string())
    );

    // Initial prompt plus one after the line.
    let printed = String::from_utf8(out.0.borrow().clone()).unwrap();
    assert_eq!(printed.matches("[GATT client]# ").count(), 2);
}

#[test]
fn several_lines_arrive_in_order() {
    let mut connector = Connector::with_transport(PairTransport::default());
    let (console_tx, console_rx) = UnixStream::pair().unwrap();
    let (lines, handler) = recorder();

    (&console_tx).write_all(b"one\ntwo\nthree").unwrap();
    drop(console_tx);

    client::run_with(
        cli(&["-d", "AA:BB:CC:DD:EE:FF"]),
        &mut connector,
        console_rx,
        handler,
        io::sink(),
    )
    .unwrap();

    // The unterminated tail is flushed at end of input.
    assert_eq!(
        *lines.borrow(),
        [b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[test]
fn remote_disconnect_stops_the_loop() {
    let mut connector = Connector::with_transport(PairTransport {
        disconnect_after_connect: true,
        ..PairTransport::default()
    });
    // Keep the console open and silent: only the channel can end the session.
    let (_console_tx, console_rx) = UnixStream::pair().unwrap();
    let (lines, handler) = recorder();

    client::run_with(
        cli(&["-d", "AA:BB:CC:DD:EE:FF", "-t", "random"]),
        &mut connector,
        console_rx,
        handler,
        io::sink(),
    )
    .unwrap();

    assert!(lines.borrow().is_empty());
}

#[test]
fn unparseable_address_fails_before_any_socket() {
    let mut connector = Connector::with_transport(PairTransport::default());
    let (_console_tx, console_rx) = UnixStream::pair().unwrap();
    let (_lines, handler) = recorder();

    let err = client::run_with(
        cli(&["-d", "not-an-address"]),
        &mut connector,
        console_rx,
        handler,
        io::sink(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Config(ConfigError::InvalidAddress(_))
    ));
    assert_eq!(connector.transport().allocated, 0);
}

#[test]
fn refused_connection_is_a_connect_error() {
    let mut connector = Connector::with_transport(PairTransport {
        refuse_connect: true,
        ..PairTransport::default()
    });
    let (_console_tx, console_rx) = UnixStream::pair().unwrap();
    let (lines, handler) = recorder();

    let err = client::run_with(
        cli(&["-d", "AA:BB:CC:DD:EE:FF", "-s", "high"]),
        &mut connector,
        console_rx,
        handler,
        io::sink(),
    )
    .unwrap_err();

    match err {
        ClientError::Connect(e) => {
            assert_eq!(e.io_error().kind(), io::ErrorKind::ConnectionRefused);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(connector.transport().security, Some(SecurityLevel::High));
    assert!(lines.borrow().is_empty());
}

#[test]
fn incoming_pdu_is_consumed_without_ending_the_session() {
    let mut connector = Connector::with_transport(PairTransport {
        // ATT Handle Value Notification, handle 0x0003.
        first_pdu: Some(vec![0x1b, 0x03, 0x00, 0x2a]),
        ..PairTransport::default()
    });
    let (console_tx, console_rx) = UnixStream::pair().unwrap();
    let (lines, handler) = recorder();

    // The console only produces input after the PDU has been handled.
    let typist = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        (&console_tx).write_all(b"after pdu\n").unwrap();
    });

    let result = client::run_with(
        cli(&["-d", "AA:BB:CC:DD:EE:FF"]),
        &mut connector,
        console_rx,
        handler,
        io::sink(),
    );
    typist.join().unwrap();

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(*lines.borrow(), [b"after pdu".to_vec()]);

    // The session released the channel: the remote end sees it closed.
    let transport = connector.transport();
    assert_eq!(transport.remotes.len(), 1);
    let mut buf = [0u8; 8];
    assert_eq!((&transport.remotes[0]).read(&mut buf).unwrap(), 0);
}
