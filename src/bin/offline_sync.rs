use anyhow::{bail, Context, Result};
use rental_l10n::clock::SystemClock;
use rental_l10n::language::Language;
use rental_l10n::offline::{HttpSnapshotSource, OfflineSyncAgent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const USAGE: &str = "usage: offline-sync <download|lookup <text> <lang>|validate|status|clear>";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("offline_sync=info".parse()?)
                .add_directive("rental_l10n=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let base_url =
        std::env::var("L10N_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let dir = PathBuf::from(
        std::env::var("OFFLINE_DATA_DIR").unwrap_or_else(|_| "data/offline".to_string()),
    );

    let source = HttpSnapshotSource::new(&base_url, Duration::from_secs(30))?;
    let agent = OfflineSyncAgent::open(Arc::new(source), &dir, Arc::new(SystemClock))
        .await
        .with_context(|| format!("Failed to open offline stores in {}", dir.display()))?;

    match command.as_str() {
        "download" => {
            let snapshot = agent.download_glossary_for_offline_sync().await?;
            info!(
                "✓ Stored {} terms (checksum {})",
                snapshot.terms.len(),
                snapshot.checksum
            );
        }
        "lookup" => {
            let (Some(text), Some(code)) = (args.get(1), args.get(2)) else {
                bail!(USAGE);
            };
            let language = Language::from_code(code)?;
            agent.initialize().await?;
            match agent.translate_offline(text, language).await {
                Some(translated) => println!("{}", translated),
                None => {
                    info!("No offline translation for '{}' ({})", text, language);
                    println!("{}", text);
                }
            }
        }
        "validate" => {
            if agent.validate_glossary_checksum().await {
                info!("✓ Offline glossary is valid");
            } else {
                bail!("Offline glossary failed validation and was cleared");
            }
        }
        "status" => {
            let status = agent.sync_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        "clear" => {
            agent.clear_offline_data().await?;
            info!("✓ Offline data cleared");
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}
