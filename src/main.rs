//! drover: herd a fleet of simulated players against a game server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use drover_advisor::{Advisor, CircuitBreaker, OpenAiAdvisory, OpenAiConfig};
use drover_core::advisory::Advisory;
use drover_core::session::SessionConnector;
use drover_engine::fleet::FleetOptions;
use drover_engine::{Fleet, SimulatedConnector};
use drover_settings::{AdvisorSettings, DroverSettings};
use drover_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use secrecy::SecretString;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "drover")]
#[command(about = "Fleet orchestrator for game server load tests")]
struct Cli {
    /// Control server port (overrides settings)
    #[arg(short, long, env = "DROVER_PORT")]
    port: Option<u16>,

    /// Directory holding http.txt, socks4.txt and socks5.txt
    #[arg(long, value_name = "DIR")]
    proxy_dir: Option<PathBuf>,

    /// Settings file (defaults to ~/.drover/settings.json)
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Use in-process simulated sessions instead of a protocol backend
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_file = cli.settings.clone().unwrap_or_else(drover_settings::settings_path);
    let settings = drover_settings::load_settings_from_path(&settings_file)
        .with_context(|| format!("loading settings from {}", settings_file.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    init_telemetry(&TelemetryConfig {
        log_level: parse_level(level),
        module_levels: Vec::new(),
        json: cli.json_logs || settings.logging.json,
    });
    tracing::info!(version = %settings.version, settings = %settings_file.display(), "starting drover");

    if !cli.simulate {
        bail!("no protocol session backend is linked into this build; run with --simulate");
    }
    let connector: Arc<dyn SessionConnector> = Arc::new(SimulatedConnector::new());
    tracing::warn!("sessions are simulated in-process");

    let advisor = Arc::new(build_advisor(&settings));
    let (events, _) = broadcast::channel(settings.server.event_buffer.max(16));
    let fleet = Fleet::new(
        connector,
        advisor,
        events,
        FleetOptions {
            settings: settings.fleet.clone(),
            proxy_dir: cli
                .proxy_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&settings.server.proxy_dir)),
        },
    );

    let background = CancellationToken::new();
    let tasks = fleet.spawn_background(background.clone());

    let server = drover_server::start(
        drover_server::ServerConfig {
            host: settings.server.host.clone(),
            port: cli.port.unwrap_or(settings.server.port),
            ..Default::default()
        },
        fleet.clone(),
    )
    .await
    .context("starting control server")?;
    tracing::info!(addr = %server.addr, "drover ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl+c")?;
    tracing::info!("shutting down");

    fleet.shutdown();
    background.cancel();
    for task in tasks {
        let _ = task.await;
    }
    server.shutdown().await;
    Ok(())
}

/// An advisor backed by the configured completion API, or a disabled one
/// (fallback content only) when no API key is set.
fn build_advisor(settings: &DroverSettings) -> Advisor {
    let AdvisorSettings {
        base_url,
        model,
        timeout_ms,
        api_key_env,
    } = &settings.advisor;
    let breaker = Arc::new(CircuitBreaker::new(Duration::from_millis(settings.fleet.breaker_cooldown_ms)));

    let Some(api_key) = std::env::var(api_key_env).ok().filter(|k| !k.trim().is_empty()) else {
        tracing::info!(env = %api_key_env, "no advisory API key, advisor disabled");
        return Advisor::new(None, breaker);
    };
    let config = OpenAiConfig {
        base_url: base_url.clone(),
        model: model.clone(),
        api_key: SecretString::from(api_key),
        timeout: Duration::from_millis(*timeout_ms),
    };
    match OpenAiAdvisory::new(config) {
        Ok(backend) => {
            tracing::info!(model = %model, "advisor enabled");
            Advisor::new(Some(Arc::new(backend) as Arc<dyn Advisory>), breaker)
        }
        Err(e) => {
            tracing::warn!(error = %e, "advisor backend unavailable, using fallback content");
            Advisor::new(None, breaker)
        }
    }
}
