//! Coordinator
//!
//! Sits between the encoder reader and the Stellarium bridge. Telescope
//! samples are carried through the alignment into the horizontal frame and
//! then to equatorial coordinates for the planetarium. Calibration targets
//! coming back from the planetarium are paired with the latest sample and
//! fed to the alignment.
//!
//! Topics:
//!
//! | direction | topic         | carries                                   |
//! |-----------|---------------|-------------------------------------------|
//! | in        | `telescope`   | `DATA` with telescope angles, stop        |
//! | in        | `calibration` | `ALIGN` with ra/dec and observation time  |
//! | in        | `control`     | reset command                             |
//! | out       | `downstream`  | enriched `DATA` every Nth sample, stop    |
//! | out       | `results`     | `ALIGN` enriched with both frames         |

use chrono::Utc;
use pushto_core::{
    Aligner, AlignMessage, AlignmentQuality, DataMessage, Equatorial, Horizontal, Message,
    Publisher, SkyConverter, Subscriber,
};
use tracing::{debug, info, warn};

/// Topics owned by the coordinator
pub struct CoordinatorTopics {
    pub telescope: Subscriber,
    pub calibration: Subscriber,
    pub control: Subscriber,
    pub downstream: Publisher,
    pub results: Publisher,
}

/// Coordinator component
pub struct Coordinator<L> {
    aligner: Aligner,
    location: L,
    publish_every: u64,
    topics: CoordinatorTopics,
    last_reading: Option<DataMessage>,
    samples: u64,
}

impl<L: SkyConverter> Coordinator<L> {
    pub fn new(aligner: Aligner, location: L, publish_every: u32, topics: CoordinatorTopics) -> Self {
        Self {
            aligner,
            location,
            publish_every: u64::from(publish_every.max(1)),
            topics,
            last_reading: None,
            samples: 0,
        }
    }

    pub fn aligner(&self) -> &Aligner {
        &self.aligner
    }

    /// Run until the telescope stops, returning the final alignment.
    ///
    /// The stop command is forwarded downstream before returning, and both
    /// output topics close when the coordinator is dropped.
    pub async fn run(mut self) -> Aligner {
        info!(
            "Coordinator running: '{}' + '{}' + '{}' -> '{}' + '{}'",
            self.topics.telescope.topic(),
            self.topics.calibration.topic(),
            self.topics.control.topic(),
            self.topics.downstream.topic(),
            self.topics.results.topic()
        );
        let mut calibration_open = true;
        let mut control_open = true;

        loop {
            tokio::select! {
                msg = self.topics.telescope.recv() => match msg {
                    Some(Message::Data(msg)) => self.on_data(msg),
                    Some(msg) if msg.is_stop() => {
                        info!("Sending stop downstream");
                        break;
                    }
                    Some(msg) => debug!("Ignoring {} message from telescope", msg.kind()),
                    None => {
                        warn!("Telescope topic closed without stop");
                        break;
                    }
                },
                msg = self.topics.calibration.recv(), if calibration_open => match msg {
                    Some(Message::Align(msg)) => self.on_calibration(msg),
                    Some(msg) => debug!("Ignoring {} message on calibration topic", msg.kind()),
                    None => {
                        info!("Calibration topic closed");
                        calibration_open = false;
                    }
                },
                msg = self.topics.control.recv(), if control_open => match msg {
                    Some(msg) if msg.is_reset() => self.on_reset(),
                    Some(msg) => debug!("Ignoring {} message on control topic", msg.kind()),
                    None => {
                        debug!("Control topic closed");
                        control_open = false;
                    }
                },
            }
        }

        if let Err(e) = self.topics.downstream.publish(&Message::stop()) {
            warn!("Could not forward stop: {}", e);
        }
        self.aligner
    }

    fn on_data(&mut self, mut msg: DataMessage) {
        self.samples += 1;

        let (phi, theta) = match (msg.phi, msg.theta) {
            (Some(phi), Some(theta)) => (phi, theta),
            _ => {
                debug!("Telescope sample without corrected angles, skipped");
                return;
            }
        };

        let (azi, alt) = self.aligner.telescope_to_horizontal(phi, theta);
        let now = Utc::now();
        let eq = self.location.to_equatorial(Horizontal { azi, alt }, now);

        msg.time = Some(now);
        msg.azi = Some(azi);
        msg.alt = Some(alt);
        msg.ra = Some(eq.ra);
        msg.dec = Some(eq.dec);

        if self.samples % self.publish_every == 0 {
            debug!("Position ra={:.6}h dec={:.6} azi={:.4} alt={:.4}", eq.ra, eq.dec, azi, alt);
            if let Err(e) = self.topics.downstream.publish(&Message::Data(msg.clone())) {
                warn!("Could not publish position: {}", e);
            }
        }
        self.last_reading = Some(msg);
    }

    fn on_calibration(&mut self, mut msg: AlignMessage) {
        let (ra, dec) = match (msg.ra, msg.dec) {
            (Some(ra), Some(dec)) => (ra, dec),
            _ => {
                warn!("Calibration target without ra/dec, ignored");
                return;
            }
        };
        let time = msg.time.unwrap_or_else(Utc::now);
        let target = self.location.to_horizontal(Equatorial { ra, dec }, time);
        info!(
            "Calibration target ra={:.6}h dec={:.6} -> azi={:.4} alt={:.4}",
            ra, dec, target.azi, target.alt
        );

        match self.last_reading.as_ref().and_then(|last| last.phi.zip(last.theta)) {
            Some((phi, theta)) => {
                if self.aligner.add_star(phi, theta, target.azi, target.alt, 1.0) {
                    self.log_quality();
                } else {
                    warn!(
                        "Alignment already holds {} stars, calibration target ignored",
                        self.aligner.len()
                    );
                }
            }
            None => warn!("Calibration target arrived before any telescope reading, alignment unchanged"),
        }

        let (phi, theta) = self.aligner.horizontal_to_telescope(target.azi, target.alt);
        msg.time = Some(time);
        msg.azi = Some(target.azi);
        msg.alt = Some(target.alt);
        msg.phi = Some(phi);
        msg.theta = Some(theta);

        if let Err(e) = self.topics.results.publish(&Message::Align(msg)) {
            warn!("Could not publish calibration result: {}", e);
        }
    }

    fn on_reset(&mut self) {
        info!("Resetting alignment, dropping {} stars", self.aligner.len());
        self.aligner.reset();
    }

    fn log_quality(&self) {
        match self.aligner.quality() {
            AlignmentQuality::Uncalibrated => {
                info!("Alignment has {} star, need at least 2", self.aligner.len());
            }
            AlignmentQuality::Calibrated { loss, .. } => {
                info!("Alignment calibrated with {} stars, loss {:.3e}", self.aligner.len(), loss);
            }
            AlignmentQuality::Degenerate { loss } => {
                warn!(
                    "Alignment geometry is degenerate with {} stars (loss {}), pointing is unreliable",
                    self.aligner.len(),
                    loss
                );
            }
        }
    }
}
