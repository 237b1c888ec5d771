// MIT License - Copyright (c) 2026 Peter Wright
// Direct TCP driver: owns the socket and runs the session on a single task

use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout};
use tracing::{debug, error, info};

use crate::config::SpaConfig;
use crate::control::SpaCommand;
use crate::error::{Result, SpaError};
use crate::session::{ConnectionState, Session};
use crate::state::DeviceState;

/// A command from the client, with a channel for the verdict.
#[derive(Debug)]
pub(crate) struct CommandRequest {
    pub command: SpaCommand,
    pub reply: oneshot::Sender<Result<()>>,
}

/// Channels the driver publishes to.
pub(crate) struct Publishers {
    pub state: watch::Sender<DeviceState>,
    pub connection: watch::Sender<ConnectionState>,
}

impl Publishers {
    fn publish(&self, session: &Session) {
        self.state.send_if_modified(|current| {
            if current != session.state() {
                *current = session.state().clone();
                true
            } else {
                false
            }
        });
        let connection = session.connection_state();
        self.connection.send_if_modified(|current| {
            if *current != connection {
                *current = connection;
                true
            } else {
                false
            }
        });
    }
}

/// Open the TCP connection, bounded by the configured timeout.
pub(crate) async fn connect(config: &SpaConfig) -> Result<TcpStream> {
    let address = config.address();
    let stream = match timeout(config.connect_timeout(), TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("TCP connect to {} failed: {}", address, e);
            return Err(SpaError::Io(e));
        }
        Err(_) => {
            error!("TCP connect to {} timed out", address);
            return Err(SpaError::ConnectionTimeout);
        }
    };
    stream.set_nodelay(true)?;
    debug!("TCP socket connected");
    Ok(stream)
}

async fn read_some(stream: &mut Option<TcpStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stream {
        Some(s) => s.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Drive a session until shutdown.
///
/// Every wakeup (socket data, command, timer) runs to completion on the
/// session before the next one is looked at, so the session never needs a
/// lock.
pub(crate) async fn run_session(
    mut session: Session,
    mut commands: mpsc::Receiver<CommandRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
    publishers: Publishers,
) {
    let mut stream: Option<TcpStream> = None;
    let mut buf = vec![0u8; 4096];

    loop {
        if stream.is_none() && session.take_connect_request() {
            session.begin_connect();
            publishers.publish(&session);
            let config = session.config().clone();
            tokio::select! {
                result = connect(&config) => match result {
                    Ok(s) => {
                        stream = Some(s);
                        session.on_connected(Instant::now());
                    }
                    Err(e) => session.on_transport_error(&e, Instant::now()),
                },
                _ = shutdown_rx.changed() => session.shutdown(),
            }
        }

        if let Some(s) = stream.as_mut() {
            for frame in session.take_outbox() {
                if let Err(e) = s.write_all(frame.as_bytes()).await {
                    error!("Socket write failed: {}", e);
                    session.on_transport_error(&SpaError::Io(e), Instant::now());
                    break;
                }
            }
        }
        if session.connection_state() != ConnectionState::Connected && stream.take().is_some() {
            debug!("Socket closed");
        }
        publishers.publish(&session);

        if session.is_shut_down() {
            break;
        }

        tokio::select! {
            read = read_some(&mut stream, &mut buf) => match read {
                Ok(0) => {
                    debug!("Reader: connection closed");
                    session.on_transport_error(&SpaError::Disconnected, Instant::now());
                }
                Ok(n) => session.on_data(&buf[..n], Instant::now()),
                Err(e) => {
                    error!("Reader: read error: {}", e);
                    session.on_transport_error(&SpaError::Io(e), Instant::now());
                }
            },
            request = commands.recv() => match request {
                Some(CommandRequest { command, reply }) => {
                    let result = session.submit(command, Instant::now());
                    let _ = reply.send(result);
                }
                None => session.shutdown(),
            },
            _ = wait_deadline(session.next_deadline()) => session.on_timer(Instant::now()),
            _ = shutdown_rx.changed() => session.shutdown(),
        }
    }

    info!("Spa session stopped");
}
