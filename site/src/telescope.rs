//! Encoder reader
//!
//! Reads the encoder board's line protocol, converts counts into the
//! corrected telescope attitude and publishes one `DATA` message per sample.
//!
//! Each line is CR LF terminated and carries five integers separated by
//! spaces:
//!
//! ```text
//! <msec> <phi_cnt> <theta_cnt> <phi_err> <theta_err>
//! ```
//!
//! Any other line is firmware chatter and is logged, not published. When the
//! reader stops, for whatever reason, it publishes the stop command and
//! closes its topic so the rest of the pipeline winds down behind it.

use async_trait::async_trait;
use chrono::Utc;
use pushto_core::{DataMessage, EncoderConfig, Message, PointingModel, Publisher};
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SAMPLE_FIELDS: usize = 5;

/// Source of sensor lines
#[async_trait]
pub trait SensorSource: Send {
    /// Next line without its terminator, `None` at end of input
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Line-oriented source over any async byte stream
pub struct LineSource<R> {
    reader: R,
    buf: String,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
        }
    }
}

impl LineSource<BufReader<tokio::fs::File>> {
    /// Open a serial device node.
    ///
    /// Line settings (9600 baud, 8N1) are expected to be configured on the
    /// device already.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        debug!("Opened serial port {}", path.as_ref().display());
        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> SensorSource for LineSource<R> {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_line(&mut self.buf).await? == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Encoder reader component
pub struct Telescope<S> {
    source: S,
    encoders: EncoderConfig,
    pointing: PointingModel,
    publisher: Publisher,
}

/// Control handle for a running [`Telescope`].
///
/// Dropping the handle stops the reader as if [`close`](Self::close) had
/// been called.
pub struct TelescopeHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TelescopeHandle {
    /// Ask the reader to stop; it publishes the stop command on its way out
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            info!("Closing telescope reader");
            let _ = tx.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the reader task to end
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Telescope reader task failed: {}", e);
        }
    }
}

impl<S: SensorSource + 'static> Telescope<S> {
    pub fn new(source: S, encoders: EncoderConfig, pointing: PointingModel, publisher: Publisher) -> Self {
        Self {
            source,
            encoders,
            pointing,
            publisher,
        }
    }

    /// Spawn the reader
    pub fn start(self) -> TelescopeHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        TelescopeHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!("Telescope reader publishing on '{}'", self.publisher.topic());

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Telescope reader received shutdown signal");
                    break;
                }
                line = self.source.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(msg) = self.handle_line(&line) {
                            if let Err(e) = self.publisher.publish(&Message::Data(msg)) {
                                warn!("Could not publish telescope sample: {}", e);
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Sensor input ended");
                        break;
                    }
                    Err(e) => {
                        error!("Error reading sensor input: {}", e);
                        break;
                    }
                },
            }
        }

        self.poison_pill();
    }

    /// Turn one sensor line into a sample, `None` if it is not a sample
    fn handle_line(&self, line: &str) -> Option<DataMessage> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            return None;
        }
        if fields.len() != SAMPLE_FIELDS {
            info!("Telescope says: {}", line.trim());
            return None;
        }

        let values = match fields.iter().map(|f| f.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
            Ok(values) => values,
            Err(e) => {
                warn!("Dropping malformed sensor line '{}': {}", line.trim(), e);
                return None;
            }
        };
        let (sensor_ms, phi_cnt, theta_cnt) = (values[0], values[1], values[2]);
        debug!(
            "Got data: {} {} {} {} {}",
            sensor_ms, phi_cnt, theta_cnt, values[3], values[4]
        );

        let (phi_raw, theta_raw) = self.encoders.convert(phi_cnt, theta_cnt);
        let (phi, theta) = self.pointing.apply(phi_raw, theta_raw);

        Some(DataMessage {
            time: Some(Utc::now()),
            sensor_ms: u64::try_from(sensor_ms).ok(),
            phi_cnt: Some(phi_cnt),
            theta_cnt: Some(theta_cnt),
            phi_raw: Some(phi_raw),
            theta_raw: Some(theta_raw),
            phi: Some(phi),
            theta: Some(theta),
            ..Default::default()
        })
    }

    /// Publish the stop command and close the topic
    fn poison_pill(self) {
        debug!("Publishing stop on '{}'", self.publisher.topic());
        if let Err(e) = self.publisher.publish(&Message::stop()) {
            warn!("Could not publish stop: {}", e);
        }
    }
}
