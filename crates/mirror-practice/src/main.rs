use anyhow::{Context, Result};
use mirror_hw::CameraFeed;
use mirror_practice::{Config, PracticeSession, Submission};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        emotion = %config.target_emotion,
        tick_ms = config.tick_ms,
        "mirror-practice starting"
    );

    let (engine, mut predictions) =
        mirror_practice::load_engine(&config.pipeline_config()).context("loading emotion pipeline")?;

    let mut feed = CameraFeed::new(config.camera_device.clone());
    feed.start()
        .with_context(|| format!("starting camera {}", config.camera_device))?;

    let mut session = PracticeSession::new(config.target_emotion, config.success_threshold);
    let mut last_message: Option<String> = None;

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!("Show me: {}", session.target());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !feed.is_running() {
                    tracing::error!("camera feed stopped unexpectedly");
                    break;
                }
                let Some(frame) = feed.get_frame() else {
                    continue;
                };
                if engine.submit(frame)? == Submission::Dropped {
                    tracing::trace!(dropped = engine.dropped(), "tick skipped; prediction in flight");
                }
            }
            Some(prediction) = predictions.recv() => {
                let observation = session.observe(&prediction.result);
                let message = observation.feedback.to_string();
                if last_message.as_deref() != Some(message.as_str()) {
                    tracing::info!(
                        confidence = prediction.result.confidence,
                        latency_ms = prediction.latency.as_millis() as u64,
                        "{message}"
                    );
                }
                if observation.first_success {
                    tracing::info!(emotion = %session.target(), attempts = session.observed(), "target emotion shown");
                }
                last_message = Some(message);
            }
            res = &mut shutdown => {
                res.context("waiting for shutdown signal")?;
                break;
            }
        }
    }

    tracing::info!(dropped = engine.dropped(), "mirror-practice shutting down");
    feed.stop();

    Ok(())
}
