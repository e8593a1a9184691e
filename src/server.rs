//! Command server
//!
//! One command per connection, one connection at a time: the burst runs to
//! completion (or abort) before the reply is sent and the next client is
//! accepted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::protocol::{parse_command, parse_size, BurstRequest, Reply, SIZE_HEADER_LEN};
use crate::shutdown::Shutdown;
use crate::status::DaemonStatus;
use crate::trigger::TriggerController;
use crate::watchdog::IdleWatchdog;

#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Bound on each accept so shutdown and idleness are noticed.
    pub accept_timeout: Duration,
    /// Bound on reading one request from a connected client.
    pub read_timeout: Duration,
    /// Consecutive accept timeouts before camera defaults are restored.
    pub watchdog_threshold: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(30),
            watchdog_threshold: 5,
        }
    }
}

pub struct CommandServer {
    listener: TcpListener,
    controller: TriggerController,
    watchdog: IdleWatchdog,
    status: Arc<DaemonStatus>,
    shutdown: Shutdown,
    settings: ServerSettings,
}

impl CommandServer {
    pub async fn bind(
        addr: SocketAddr,
        controller: TriggerController,
        status: Arc<DaemonStatus>,
        shutdown: Shutdown,
        settings: ServerSettings,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind command socket {}", addr))?;
        Ok(Self {
            listener,
            controller,
            watchdog: IdleWatchdog::new(settings.watchdog_threshold),
            status,
            shutdown,
            settings,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; returns once shutdown is requested.
    pub async fn run(mut self) -> Result<()> {
        info!("Listening for commands on {}", self.local_addr()?);

        while !self.shutdown.is_triggered() {
            let accepted = tokio::select! {
                res = timeout(self.settings.accept_timeout, self.listener.accept()) => res,
                _ = self.shutdown.wait() => break,
            };

            match accepted {
                Err(_) => self.on_idle(),
                Ok(Err(e)) => warn!("Accept failed: {}", e),
                Ok(Ok((stream, peer))) => {
                    self.watchdog.on_accept();
                    debug!("Connection from {}", peer);
                    if let Err(e) = self.serve_connection(stream).await {
                        warn!("Connection from {} dropped: {:#}", peer, e);
                    }
                }
            }
        }

        info!("Command server stopped");
        Ok(())
    }

    fn on_idle(&mut self) {
        if self.watchdog.on_timeout() {
            warn!(
                "No client for {} accept timeouts, restoring camera defaults",
                self.watchdog.consecutive_timeouts()
            );
            self.controller.camera().restore_defaults();
            self.status.watchdog_tripped();
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<()> {
        let parsed = tokio::select! {
            res = timeout(self.settings.read_timeout, read_request(&mut stream)) => res
                .context("Timed out waiting for command")?
                .context("Failed to read command")?,
            _ = self.shutdown.wait() => {
                info!("Shutdown requested, closing connection without a reply");
                return Ok(());
            }
        };

        let reply = match parsed {
            Ok(request) => {
                self.controller.run_burst(&request).await;
                Reply::Done
            }
            Err(e) => {
                warn!("Rejected command: {}", e);
                Reply::Error
            }
        };

        // Unread input makes the close a reset, which can drop the reply.
        discard_pending(&stream);
        stream.write_all(reply.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Read and drop whatever the peer has already sent, without waiting.
fn discard_pending(stream: &TcpStream) {
    let mut scratch = [0u8; 512];
    while let Ok(n) = stream.try_read(&mut scratch) {
        if n == 0 {
            break;
        }
    }
}

/// Read the size header and the command body. Socket errors (including a
/// peer hanging up mid-message) are the outer error; a bad command is the
/// inner one and still gets a reply.
async fn read_request<R>(stream: &mut R) -> io::Result<Result<BurstRequest, ProtocolError>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; SIZE_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let size = match parse_size(&header) {
        Ok(size) => size,
        Err(e) => return Ok(Err(e)),
    };

    debug!("Receiving {} bytes...", size);
    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).await?;
    info!("Received command: {}", String::from_utf8_lossy(&body));

    Ok(parse_command(&body))
}
