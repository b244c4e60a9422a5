use std::io::{self, Read, Write};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
#[cfg(not(feature = "coverage"))]
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
#[cfg(not(feature = "coverage"))]
use std::net::TcpStream;

#[cfg(not(feature = "coverage"))]
use crate::mumble::config::NetworkConfig;
use crate::mumble::outbound::OutboundRequest;
use crate::mumble::protocol::MumbleProtocol;
use crate::transport::errors::TransportError;

const READ_CHUNK: usize = 4096;

/// Shortest read timeout handed to the stream; zero means "block forever"
/// to most socket APIs.
const MIN_POLL: Duration = Duration::from_millis(1);

/// Longest a read may block, so the per-iteration hook stays responsive.
const MAX_POLL: Duration = Duration::from_millis(250);

/// Byte stream the session loop can bound reads on and close.
pub trait ControlStream: Read + Write {
    fn set_poll_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

#[cfg(not(feature = "coverage"))]
impl ControlStream for SslStream<TcpStream> {
    fn set_poll_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.get_ref().set_read_timeout(timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Err(err) = self.shutdown() {
            debug!("tls close_notify failed: {err}");
        }
        self.get_ref().shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(not(feature = "coverage"))]
pub fn tls_connect(network: &NetworkConfig) -> Result<SslStream<TcpStream>, TransportError> {
    let tcp = TcpStream::connect((network.address.as_str(), network.port))?;
    tcp.set_nodelay(true)?;
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|err| TransportError::Io(format!("tls connector init failed: {err}")))?;
    if !network.verify_certificate {
        builder.set_verify(SslVerifyMode::NONE);
    }
    let connector = builder.build();
    connector
        .connect(&network.address, tcp)
        .map_err(|err| TransportError::Io(format!("tls handshake failed: {err}")))
}

/// Drives a `MumbleProtocol` over a blocking stream until either side
/// closes the connection.
pub struct BlockingSession<S> {
    stream: S,
}

impl<S: ControlStream> BlockingSession<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Runs the connection to completion. A framing violation or I/O
    /// failure is returned after the stream has been closed.
    pub fn run(&mut self, protocol: &mut MumbleProtocol) -> Result<(), TransportError> {
        self.run_with(protocol, |_| {})
    }

    /// Like `run`, calling `hook` once per loop iteration after inbound data
    /// and keepalive are handled. Anything the hook queues on the engine
    /// (`send`, `join`, `shutdown`) is written before the next read.
    pub fn run_with<F>(
        &mut self,
        protocol: &mut MumbleProtocol,
        mut hook: F,
    ) -> Result<(), TransportError>
    where
        F: FnMut(&mut MumbleProtocol),
    {
        protocol.connect(Instant::now())?;
        let result = self.pump(protocol, &mut hook);

        if let Err(err) = self.stream.close() {
            debug!("closing control stream failed: {err}");
        }
        match &result {
            Err(err) if !protocol.close_requested() => protocol.transport_error(err),
            _ => protocol.transport_closed(),
        }
        result
    }

    fn pump(
        &mut self,
        protocol: &mut MumbleProtocol,
        hook: &mut dyn FnMut(&mut MumbleProtocol),
    ) -> Result<(), TransportError> {
        let mut buffer = [0u8; READ_CHUNK];
        loop {
            self.flush(protocol)?;
            if protocol.close_requested() {
                return Ok(());
            }

            let timeout = poll_timeout(protocol.next_keepalive(), Instant::now());
            self.stream.set_poll_timeout(timeout)?;
            match self.stream.read(&mut buffer) {
                Ok(0) => {
                    info!("server closed the connection");
                    return Ok(());
                }
                Ok(read) => protocol.receive(&buffer[..read])?,
                Err(err) if is_poll_timeout(&err) => {}
                Err(err) => return Err(err.into()),
            }
            protocol.tick(Instant::now());
            hook(protocol);
        }
    }

    fn flush(&mut self, protocol: &mut MumbleProtocol) -> Result<(), TransportError> {
        let frames = protocol.take_outgoing();
        if frames.is_empty() {
            return Ok(());
        }
        for frame in frames {
            self.stream.write_all(&frame)?;
        }
        self.stream.flush()?;
        Ok(())
    }
}

/// Session hook executing requests sent from other threads, such as a
/// console reader.
pub fn apply_requests(
    requests: &Receiver<OutboundRequest>,
) -> impl FnMut(&mut MumbleProtocol) + '_ {
    move |protocol| {
        while let Ok(request) = requests.try_recv() {
            if let Err(err) = protocol.apply(request) {
                warn!("queued request failed: {err}");
            }
        }
    }
}

fn poll_timeout(next_keepalive: Option<Instant>, now: Instant) -> Option<Duration> {
    let wait = next_keepalive
        .map(|due| due.saturating_duration_since(now))
        .unwrap_or(MAX_POLL);
    Some(wait.clamp(MIN_POLL, MAX_POLL))
}

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
