//! Push-To site
//!
//! The running system: encoder reader, coordinator and Stellarium bridge,
//! each in its own task, talking only through topics.
//!
//! ```text
//! serial -> Telescope --telescope-attitude--> Coordinator --telescope-equatorial--> StellariumLink -> Stellarium
//!                                                 ^                                       |
//!                                                 +----------pointing-equatorial----------+
//!                                   Coordinator --pointing-attitude--> calibration results
//!                 Pipeline --site-control--> Coordinator (alignment reset)
//! ```

pub mod config;
pub mod telescope;
pub mod coordinator;

pub use config::{ConfigError, PushToConfig};
pub use coordinator::{Coordinator, CoordinatorTopics};
pub use telescope::{LineSource, SensorSource, Telescope, TelescopeHandle};

use pushto_core::{Aligner, Message, Publisher, SkyConverter, Subscriber};
use pushto_stellarium::{StellariumLink, StellariumResult};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

/// Encoder samples in the telescope frame
pub const TELESCOPE_TOPIC: &str = "telescope-attitude";
/// Telescope position in equatorial coordinates, towards Stellarium
pub const EQUATORIAL_TOPIC: &str = "telescope-equatorial";
/// Calibration targets chosen in Stellarium
pub const CALIBRATION_TOPIC: &str = "pointing-equatorial";
/// Calibration targets in both frames
pub const RESULTS_TOPIC: &str = "pointing-attitude";
/// Operator commands for the coordinator
pub const CONTROL_TOPIC: &str = "site-control";

/// Handles on a running pipeline
pub struct Pipeline {
    telescope: TelescopeHandle,
    coordinator: JoinHandle<Aligner>,
    bridge: JoinHandle<StellariumResult<()>>,
    control: Publisher,
    results: Option<Subscriber>,
    coordinator_result: Option<Result<Aligner, JoinError>>,
}

impl Pipeline {
    /// Start every component.
    ///
    /// The Stellarium link must already be established. All topics and
    /// subscriptions are created before any task starts, so nothing published
    /// by one component can be missed by another.
    pub fn spawn<S, L>(config: &PushToConfig, source: S, location: L, link: StellariumLink) -> Self
    where
        S: SensorSource + 'static,
        L: SkyConverter + 'static,
    {
        let capacity = config.communication.channel_capacity;
        let telescope_pub = Publisher::new(TELESCOPE_TOPIC, capacity);
        let equatorial_pub = Publisher::new(EQUATORIAL_TOPIC, capacity);
        let calibration_pub = Publisher::new(CALIBRATION_TOPIC, capacity);
        let results_pub = Publisher::new(RESULTS_TOPIC, capacity);
        let control = Publisher::new(CONTROL_TOPIC, capacity);

        let results = results_pub.subscribe();
        let equatorial_sub = equatorial_pub.subscribe();
        let topics = CoordinatorTopics {
            telescope: telescope_pub.subscribe(),
            calibration: calibration_pub.subscribe(),
            control: control.subscribe(),
            downstream: equatorial_pub,
            results: results_pub,
        };

        let bridge = tokio::spawn(link.run(equatorial_sub, calibration_pub));

        let aligner = Aligner::new(config.alignment.max_stars);
        let coordinator = Coordinator::new(aligner, location, config.communication.publish_every, topics);
        let coordinator = tokio::spawn(coordinator.run());

        let telescope = Telescope::new(source, config.encoders, config.pointing, telescope_pub).start();

        Self {
            telescope,
            coordinator,
            bridge,
            control,
            results: Some(results),
            coordinator_result: None,
        }
    }

    /// Calibration results, subscribed before anything could be published
    pub fn take_results(&mut self) -> Option<Subscriber> {
        self.results.take()
    }

    /// Ask the coordinator to drop every alignment star
    pub fn reset_alignment(&self) {
        if let Err(e) = self.control.publish(&Message::reset()) {
            warn!("Could not request alignment reset: {}", e);
        }
    }

    /// Resolves once the coordinator has stopped, whatever the cause.
    ///
    /// Safe to use in `select!`: dropping it early loses nothing.
    pub async fn stopped(&mut self) {
        if self.coordinator_result.is_none() {
            self.coordinator_result = Some((&mut self.coordinator).await);
        }
    }

    /// Stop the reader and wait for the stop to reach every component
    pub async fn shutdown(mut self) -> Option<Aligner> {
        self.telescope.close();
        self.wait().await
    }

    /// Wait for every component to finish, returning the final alignment
    pub async fn wait(mut self) -> Option<Aligner> {
        self.stopped().await;
        // Nothing consumes samples any more
        if !self.telescope.is_finished() {
            self.telescope.close();
        }
        self.telescope.join().await;

        let aligner = match self.coordinator_result.take() {
            Some(Ok(aligner)) => Some(aligner),
            Some(Err(e)) => {
                error!("Coordinator task failed: {}", e);
                None
            }
            None => None,
        };

        match self.bridge.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Stellarium bridge ended with error: {}", e),
            Err(e) => error!("Stellarium bridge task failed: {}", e),
        }

        info!("Pipeline stopped");
        aligner
    }
}
