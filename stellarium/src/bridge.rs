//! Stellarium telescope-control bridge
//!
//! Stellarium's Telescope Control plugin connects to us as a client. The
//! bridge accepts exactly one connection, then forwards the telescope's
//! equatorial position from the data topic to Stellarium and publishes every
//! "goto" Stellarium sends as an `ALIGN` calibration target.
//!
//! Lifecycle:
//! 1. [`StellariumTc::bind`] opens the listening socket
//! 2. [`StellariumTc::handshake`] waits for Stellarium, failing after the
//!    configured idle timeout
//! 3. [`StellariumLink::run`] pumps messages until a stop command, the end of
//!    the data topic, or the connection closing

use crate::error::{StellariumError, StellariumResult};
use crate::protocol::{decode_goto, encode_position, FrameBuffer, GOTO_FRAME_SIZE};
use chrono::Utc;
use pushto_core::{AlignMessage, DataMessage, Message, Publisher, Subscriber};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Default idle time allowed for Stellarium to connect
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(600);

const READ_BUFFER_SIZE: usize = 640;

/// Listening side of the telescope-control link, before Stellarium connects
#[derive(Debug)]
pub struct StellariumTc {
    listener: TcpListener,
    handshake_timeout: Duration,
}

impl StellariumTc {
    /// Bind the telescope-control server socket
    pub async fn bind(host: &str, port: u16, handshake_timeout: Duration) -> StellariumResult<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("Waiting for Stellarium on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            handshake_timeout,
        })
    }

    pub fn local_addr(&self) -> StellariumResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the single Stellarium connection.
    ///
    /// The listening socket is released whatever the outcome.
    pub async fn handshake(self) -> StellariumResult<StellariumLink> {
        debug!("Attempting handshake with Stellarium");
        let accepted = timeout(self.handshake_timeout, self.listener.accept()).await;

        match accepted {
            Ok(Ok((stream, peer))) => {
                info!("Connected to Stellarium at {}", peer);
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Could not disable Nagle on Stellarium link: {}", e);
                }
                Ok(StellariumLink {
                    stream,
                    peer,
                    frames: FrameBuffer::new(),
                })
            }
            Ok(Err(e)) => {
                error!("Failed handshake with Stellarium: {}", e);
                Err(StellariumError::HandshakeFailed(e.to_string()))
            }
            Err(_) => {
                error!(
                    "Failed handshake with Stellarium: no connection within {:?}",
                    self.handshake_timeout
                );
                Err(StellariumError::HandshakeTimeout(self.handshake_timeout))
            }
        }
    }
}

/// Established telescope-control connection
#[derive(Debug)]
pub struct StellariumLink {
    stream: TcpStream,
    peer: SocketAddr,
    frames: FrameBuffer,
}

/// Why the link stopped pumping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stop,
    TopicClosed,
    Disconnected,
}

impl StellariumLink {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Run the bridge until shutdown.
    ///
    /// `data` carries the telescope position, `calibration` receives the
    /// targets chosen in Stellarium. The connection is closed on every exit
    /// path and the calibration topic closes when this returns.
    pub async fn run(mut self, mut data: Subscriber, calibration: Publisher) -> StellariumResult<()> {
        let result = self.pump(&mut data, &calibration).await;

        match &result {
            Ok(Exit::Stop) => info!("Stellarium bridge received stop"),
            Ok(Exit::TopicClosed) => info!("Data topic '{}' closed, stopping Stellarium bridge", data.topic()),
            Ok(Exit::Disconnected) => info!("Stellarium at {} closed the connection", self.peer),
            Err(e) => error!("Stellarium bridge failed: {}", e),
        }

        self.close().await;
        result.map(|_| ())
    }

    async fn pump(&mut self, data: &mut Subscriber, calibration: &Publisher) -> StellariumResult<Exit> {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                msg = data.recv() => {
                    match msg {
                        Some(Message::Data(msg)) => self.send_position(&msg).await?,
                        Some(msg) if msg.is_stop() => return Ok(Exit::Stop),
                        Some(msg) => debug!("Ignoring {} message on '{}'", msg.kind(), data.topic()),
                        None => return Ok(Exit::TopicClosed),
                    }
                }
                read = self.stream.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(Exit::Disconnected);
                    }
                    self.frames.extend(&buf[..n]);
                    self.publish_targets(calibration);
                }
            }
        }
    }

    async fn send_position(&mut self, msg: &DataMessage) -> StellariumResult<()> {
        let (ra, dec) = match (msg.ra, msg.dec) {
            (Some(ra), Some(dec)) => (ra, dec),
            _ => {
                debug!("Data message without equatorial coordinates, not forwarded");
                return Ok(());
            }
        };

        let time = msg.time.unwrap_or_else(Utc::now);
        match encode_position(time, ra, dec) {
            Ok(frame) => self.stream.write_all(&frame).await?,
            Err(e) => warn!("Could not encode position for Stellarium: {}", e),
        }
        Ok(())
    }

    fn publish_targets(&mut self, calibration: &Publisher) {
        while let Some(frame) = self.frames.next_frame() {
            if frame.len() < GOTO_FRAME_SIZE {
                warn!("Skipping {}-byte frame from Stellarium", frame.len());
                continue;
            }

            let target = match decode_goto(&frame) {
                Ok(target) => target,
                Err(e) => {
                    warn!("Skipping undecodable frame from Stellarium: {}", e);
                    continue;
                }
            };

            let msg = Message::Align(AlignMessage {
                time: Some(target.time),
                ra: Some(target.ra),
                dec: Some(target.dec),
                ..Default::default()
            });
            debug!("Calibration target from Stellarium: ra={:.6}h dec={:.6}", target.ra, target.dec);
            if let Err(e) = calibration.publish(&msg) {
                warn!("Could not publish calibration target: {}", e);
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            warn!("Error closing Stellarium connection: {}", e);
        }
        debug!("Disconnected from Stellarium");
    }
}
