//! Connection management for host probes
//!
//! A probe owns exactly one connection. Every read and write on it is bounded
//! by a single deadline fixed right after the connection is established, so a
//! silent or trickling host can never hold a worker longer than the configured
//! I/O timeout.

use crate::error::{ProbeError, ProbeResult, ProbeStep};
use crate::network::packet::{MAX_FRAME_PAYLOAD, NETBIOS_HEADER_LEN};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

/// Open a TCP connection, giving up after `connect_timeout`
pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> ProbeResult<TcpStream> {
    let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ProbeError::Connect(e)),
        Err(_) => return Err(ProbeError::ConnectTimeout),
    };

    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Could not disable Nagle on {}: {}", addr, e);
    }

    Ok(stream)
}

/// NetBIOS-framed request/response channel with a fixed I/O deadline
pub struct SmbConnection<S> {
    stream: S,
    deadline: Instant,
}

impl<S> SmbConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `stream`; the deadline starts now
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self::with_deadline(stream, Instant::now() + io_timeout)
    }

    fn with_deadline(stream: S, deadline: Instant) -> Self {
        Self { stream, deadline }
    }

    /// Write one complete request
    pub async fn send(&mut self, step: ProbeStep, packet: &[u8]) -> ProbeResult<()> {
        let deadline = self.deadline;
        let stream = &mut self.stream;
        bounded(step, deadline, async move {
            stream.write_all(packet).await?;
            stream.flush().await
        })
        .await
    }

    /// Read one complete NetBIOS session frame, header included
    pub async fn recv(&mut self, step: ProbeStep) -> ProbeResult<Vec<u8>> {
        let mut header = [0u8; NETBIOS_HEADER_LEN];
        let deadline = self.deadline;
        bounded(step, deadline, self.stream.read_exact(&mut header)).await?;

        let len = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(ProbeError::FrameTooLarge { step, len });
        }

        let mut frame = vec![0u8; NETBIOS_HEADER_LEN + len];
        frame[..NETBIOS_HEADER_LEN].copy_from_slice(&header);
        bounded(
            step,
            deadline,
            self.stream.read_exact(&mut frame[NETBIOS_HEADER_LEN..]),
        )
        .await?;

        Ok(frame)
    }

    /// Send a request and wait for its response
    pub async fn exchange(&mut self, step: ProbeStep, packet: &[u8]) -> ProbeResult<Vec<u8>> {
        self.send(step, packet).await?;
        self.recv(step).await
    }
}

async fn bounded<F, T>(step: ProbeStep, deadline: Instant, op: F) -> ProbeResult<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match timeout_at(deadline, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ProbeError::Io { step, source }),
        Err(_) => Err(ProbeError::Timeout { step }),
    }
}
