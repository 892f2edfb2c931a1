//! pushto: push-to telescope server
//!
//! Waits for Stellarium's Telescope Control plugin to connect, then reads the
//! encoder board and keeps Stellarium's telescope reticle on target until
//! interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use pushto_core::{direction, vec_from_angles, Location, Message, Subscriber};
use pushto_site::{LineSource, Pipeline, PushToConfig};
use pushto_stellarium::{StellariumRpc, StellariumTc};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pushto",
    about = "Push-to telescope server for Stellarium",
    long_about = "Push-to telescope server for Stellarium.\n\n\
        Positions are sent as equatorial coordinates of date. The built-in \
        sky conversion has no precession or nutation, so against Stellarium's \
        J2000 catalogue positions differ by about 0.3 degrees today; the star \
        alignment absorbs most of this near the calibration stars.\n\n\
        Send SIGHUP to clear the alignment stars, Ctrl-C or SIGTERM to stop."
)]
struct Args {
    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port connected to the encoder board, overrides the configuration
    #[arg(long)]
    port: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Compare every calibration with the object selected in Stellarium,
    /// through the Remote Control plugin
    #[arg(long)]
    check_rpc: bool,

    /// Write the default configuration to this file and exit
    #[arg(long, value_name = "FILE")]
    write_default_config: Option<PathBuf>,
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Log calibration results, optionally checked against Stellarium's selection
async fn report_calibrations(mut results: Subscriber, mut rpc: Option<StellariumRpc>) {
    while let Some(msg) = results.recv().await {
        let Message::Align(calib) = msg else {
            continue;
        };
        info!(
            "Calibration: ra={:?} dec={:?} azi={:?} alt={:?} phi={:?} theta={:?}",
            calib.ra, calib.dec, calib.azi, calib.alt, calib.phi, calib.theta
        );

        let (Some(rpc), Some(azi), Some(alt)) = (rpc.as_mut(), calib.azi, calib.alt) else {
            continue;
        };
        match rpc.selected_alt_az().await {
            Ok((stel_alt, stel_azi)) => {
                let ours = vec_from_angles(azi, alt);
                let theirs = vec_from_angles(stel_azi, stel_alt);
                let arcsec = direction::separation(&ours, &theirs) * 3600.0;
                info!(
                    "Stellarium selection azi={:.6} alt={:.6}, ours azi={:.6} alt={:.6}, off by {:.1} arcsec",
                    stel_azi, stel_alt, azi, alt, arcsec
                );
            }
            Err(e) => warn!("Could not query Stellarium selection: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    if let Some(path) = &args.write_default_config {
        PushToConfig::default()
            .save(path)
            .with_context(|| format!("writing default configuration to {}", path.display()))?;
        info!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = PushToConfig::load_or_default(args.config.as_deref())?;
    if let Some(port) = args.port {
        info!("Using serial port {}", port);
        config.communication.serial_port = port;
    }
    let comm = &config.communication;

    // Stellarium first: nothing else is useful without it
    let tc = StellariumTc::bind(&comm.host_ip, comm.stc_port, comm.handshake_timeout())
        .await
        .with_context(|| format!("binding {}:{}", comm.host_ip, comm.stc_port))?;
    let link = tc.handshake().await.context("waiting for Stellarium")?;

    let source = LineSource::open(&comm.serial_port)
        .await
        .with_context(|| format!("opening serial port {}", comm.serial_port))?;

    let rpc = if args.check_rpc {
        Some(StellariumRpc::new(comm.rpc_url.clone())?)
    } else {
        None
    };

    let location = Location::new(config.location.clone());
    info!(
        "Observer at lat={} lon={}; equatorial coordinates are of date, without precession to J2000",
        config.location.latitude, config.location.longitude
    );
    let mut pipeline = Pipeline::spawn(&config, source, location, link);
    if let Some(results) = pipeline.take_results() {
        tokio::spawn(report_calibrations(results, rpc));
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut resets = ResetRequests::install();
    info!("Running; send SIGHUP to clear the alignment, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = pipeline.stopped() => {
                warn!("Pipeline stopped by itself, exiting");
                break;
            }
            _ = resets.next() => {
                info!("Alignment reset requested");
                pipeline.reset_alignment();
            }
        }
    }

    if let Some(aligner) = pipeline.shutdown().await {
        info!("Final alignment: {} stars, {:?}", aligner.len(), aligner.quality());
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM where there is one
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Keyboard interrupt, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Alignment resets requested with SIGHUP
struct ResetRequests {
    #[cfg(unix)]
    hangup: Option<tokio::signal::unix::Signal>,
}

impl ResetRequests {
    fn install() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let hangup = match signal(SignalKind::hangup()) {
                Ok(hangup) => Some(hangup),
                Err(e) => {
                    warn!("Could not listen for SIGHUP, alignment reset unavailable: {}", e);
                    None
                }
            };
            Self { hangup }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the next request; never resolves without a signal source
    async fn next(&mut self) {
        #[cfg(unix)]
        {
            if let Some(hangup) = self.hangup.as_mut() {
                if hangup.recv().await.is_some() {
                    return;
                }
                self.hangup = None;
            }
        }
        std::future::pending::<()>().await
    }
}
