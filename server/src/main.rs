mod alert;
mod annotate;
mod api;
mod detector;
mod frame;
mod recorder;
mod registry;
mod source;
mod supervisor;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use person_watch_common::config::Config;
use tracing::{error, info};

use alert::{CommandNotifier, Notifier, SilentNotifier};
use api::AppState;
use detector::{Detector, HttpDetector};
use recorder::encoder::check_ffmpeg_available;
use recorder::CapturePipeline;
use registry::JobRegistry;
use source::FfmpegBackend;
use supervisor::RunSupervisor;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        fps = config.capture.fps,
        duration_secs = config.capture.duration_secs,
        target_frames = config.capture.target_frame_count(),
        "person-watch starting"
    );

    check_ffmpeg_available(&config.stream.ffmpeg_path).await;

    let media = Arc::new(FfmpegBackend::new(
        config.stream.clone(),
        &config.encoder,
        config.capture.fps,
        config.capture.jpeg_quality,
    ));
    let detector = match HttpDetector::new(&config.detector) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!(error = %e, "failed to build detector client");
            std::process::exit(1);
        }
    };
    info!(detector = detector.name(), "detector client ready");
    let notifier: Arc<dyn Notifier> = if config.alert.enabled {
        Arc::new(CommandNotifier::new(
            config.alert.player.clone(),
            config.alert.sound_path.clone(),
        ))
    } else {
        Arc::new(SilentNotifier)
    };

    let registry = Arc::new(JobRegistry::new());
    let pipeline = Arc::new(
        CapturePipeline::new(
            config.capture.clone(),
            media,
            detector,
            notifier,
            Arc::clone(&registry),
        )
        .with_alert_timeout(Duration::from_millis(config.alert.timeout_ms)),
    );
    let supervisor = RunSupervisor::new(pipeline);

    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        registry,
    });
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    info!(addr, "detection API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
        supervisor.shutdown().await;
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
    info!("person-watch stopped");
}
