//! Drummer and bassist jamming on the built-in clock.
//!
//! Run with: cargo run -p jam-session -- [config.toml] [bars]
//!
//! Without `[[agents]]` in the config a drummer and bassist are added. Notes
//! and animation gestures are logged as they are produced, each new bar at
//! debug level; a section change is cued halfway through.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use bandmate_core::TracingCollaborator;
use bandmate_ensemble::Ensemble;
use bandmate_session::{AgentKind, AgentSpec, BandConfig, Cue, SessionAuthority};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BARS: u64 = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let bars = args
        .next()
        .map(|bars| bars.parse::<u64>())
        .transpose()
        .context("bars must be a whole number")?
        .unwrap_or(DEFAULT_BARS);

    let (mut config, sources) = BandConfig::load_from(config_path.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .init();

    if config.agents.is_empty() {
        config.agents = default_band();
    }
    tracing::info!(
        files = ?sources.files,
        env = ?sources.env_overrides,
        tempo = config.context.tempo_bpm,
        bars,
        "Starting jam"
    );

    let mut session = SessionAuthority::from_config(&config);
    Ensemble::from_config(&config)?.join(&mut session)?;
    let forwarder = session
        .outputs()
        .spawn_collaborator(Arc::new(TracingCollaborator));

    let beats = bars * u64::from(config.context.beats_per_bar);
    #[allow(clippy::cast_precision_loss)]
    let length = Duration::try_from_secs_f64(beats as f64 * 60.0 / config.context.tempo_bpm)
        .context("song length out of range")?;

    let handle = session.handle();
    let mut contexts = handle.context_stream();
    let follower = tokio::spawn(async move {
        let mut last_bar = None;
        while let Some(context) = contexts.next().await {
            if last_bar != Some(context.bar_position) {
                last_bar = Some(context.bar_position);
                tracing::debug!(bar = context.bar_position, section = %context.section, chord = %context.chord, "bar");
            }
        }
    });

    tokio::spawn(async move {
        let song = async {
            tokio::time::sleep(length / 2).await;
            handle.cue(Cue::SectionChange("chorus".to_string()));
            tokio::time::sleep(length / 2).await;
            tracing::info!("Reached the last bar");
        };
        tokio::select! {
            () = song => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for ctrl-c");
                }
                tracing::info!("Interrupted");
            }
        }
        handle.stop();
    });

    session.start()?;
    let ticks = session.run().await?;
    forwarder.abort();
    follower.abort();

    let context = session.context();
    tracing::info!(
        ticks,
        bar = context.bar_position,
        section = %context.section,
        events = session.outputs().history().len(),
        "Jam finished"
    );
    Ok(())
}

fn default_band() -> Vec<AgentSpec> {
    vec![
        AgentSpec {
            id: "drummer".to_string(),
            kind: AgentKind::Drums,
            responsiveness: 0.7,
            enabled: true,
            listeners: vec!["bassist".to_string()],
            groove_partner: None,
        },
        AgentSpec {
            id: "bassist".to_string(),
            kind: AgentKind::Bass,
            responsiveness: 0.8,
            enabled: true,
            listeners: Vec::new(),
            groove_partner: Some("drummer".to_string()),
        },
    ]
}
