//! Command-line front end for the resilient translation client.
//!
//! ```text
//! resilient-translator --config client.toml translate "Hello" --from en --to es
//! resilient-translator synthesize "Hola" --lang es --output hola.mp3
//! resilient-translator status
//! ```
//!
//! The API key is read from the environment variable named by
//! `credentials.secret_env_var` (default `TRANSLATOR_API_KEY`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use resilient_translator::cache::TranslationCache;
use resilient_translator::client::{HttpBackend, ResilientApiClient, VoiceParams};
use resilient_translator::config::{load_config, ClientConfig};
use resilient_translator::credentials::provision::provision_from_env;
use resilient_translator::credentials::{CredentialRotator, SecureCredentialStore, TracingAuditSink};
use resilient_translator::lifecycle::{signals, Shutdown};
use resilient_translator::network::{HttpProbe, NetworkQualityMonitor};
use resilient_translator::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "resilient-translator")]
#[command(about = "Translate and synthesize speech through a resilient backend client", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate text
    Translate {
        text: String,
        #[arg(long, default_value = "en")]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Synthesize speech and write the audio to a file
    Synthesize {
        text: String,
        #[arg(long)]
        lang: String,
        #[arg(long, default_value = "default")]
        voice: String,
        #[arg(long)]
        output: PathBuf,
    },
    /// Show network tier and credential rotation status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    logging::init_tracing(&config.observability.log_level)?;
    tracing::info!(backend = %config.backend.base_url, "resilient-translator starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = Arc::new(SecureCredentialStore::new(Arc::new(TracingAuditSink)));
    provision_from_env(&store, &config.credentials)?;
    let service_id = config.credentials.service_id.clone();
    let rotator = Arc::new(
        CredentialRotator::new(store).with_format(&service_id, config.credentials.key_format()),
    );

    let rotation_period = Duration::from_secs(config.credentials.rotation_period_days * 24 * 60 * 60);
    if rotator.rotation_due(&service_id, rotation_period)? {
        tracing::warn!(service_id = %service_id, "Credential is due for rotation");
    }

    let network = if config.network.enabled {
        let probe_url = config
            .network
            .probe_url
            .clone()
            .unwrap_or_else(|| config.backend.base_url.clone());
        let probe = HttpProbe::new(probe_url, Duration::from_millis(config.network.probe_timeout_ms));
        let monitor = NetworkQualityMonitor::from_config(&config.network, Arc::new(probe));
        monitor.sample().await;
        monitor
    } else {
        NetworkQualityMonitor::manual()
    };

    let translations = match &config.cache.persist_path {
        Some(path) => TranslationCache::load_from_file(Path::new(path), config.cache.max_translations)?,
        None => TranslationCache::new(config.cache.max_translations),
    };

    let backend = Arc::new(HttpBackend::from_config(&config.backend)?);
    let client = Arc::new(
        ResilientApiClient::builder(config.clone(), backend, rotator)
            .network(network)
            .translation_cache(translations)
            .build(),
    );

    let shutdown = Shutdown::new();
    client.spawn_background(&shutdown);

    let outcome = tokio::select! {
        result = run(&client, cli.command, rotation_period) => result,
        _ = signals::trigger_on_ctrl_c(&shutdown) => Err("interrupted".into()),
    };

    if let Some(path) = &config.cache.persist_path {
        if let Err(e) = client.translation_cache().save_to_file(Path::new(path)) {
            tracing::error!(error = %e, "Failed to save translation cache");
        }
    }
    shutdown.shutdown(Duration::from_secs(5)).await;

    tracing::info!("Shutdown complete");
    outcome
}

async fn run(
    client: &ResilientApiClient,
    command: Commands,
    rotation_period: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Translate { text, from, to } => {
            let translation = client.translate(&text, &from, &to).await?;
            println!("{}", translation.text);
            tracing::info!(
                confidence = translation.confidence,
                from_cache = translation.from_cache,
                "Translation complete"
            );
        }
        Commands::Synthesize {
            text,
            lang,
            voice,
            output,
        } => {
            let audio = client
                .synthesize(&text, &lang, &VoiceParams::named(&voice))
                .await?;
            tokio::fs::write(&output, &audio.bytes).await?;
            println!(
                "Wrote {} bytes ({}) to {}",
                audio.bytes.len(),
                audio.content_type,
                output.display()
            );
        }
        Commands::Status => {
            let condition = client.network().current();
            let due = client
                .rotator()
                .rotation_due(client.service_id(), rotation_period)?;
            let status = serde_json::json!({
                "network_tier": condition.tier,
                "latency_ms": condition.observed_latency_ms,
                "bandwidth_bps": condition.observed_bandwidth_bps,
                "service_id": client.service_id(),
                "rotation_due": due,
                "cached_translations": client.translation_cache().len(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
