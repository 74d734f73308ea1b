//! rarexsec-catalogue - recipe to sample catalogue
//!
//! Resolves settings (CLI > ENV > TOML > defaults), then builds and writes
//! `<catalogue_dir>/samples.json`.

use anyhow::Result;
use clap::Parser;
use rarexsec_catalogue::cli::Args;
use rarexsec_common::config::{load_toml_config, resolve_settings, CompiledDefaults};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config-file warnings surface before the configured subscriber exists
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .finish();
    let toml_config = tracing::subscriber::with_default(bootstrap, || {
        load_toml_config(args.config.as_deref())
    });
    let settings = resolve_settings(args.to_overrides(), toml_config, CompiledDefaults::default());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .init();

    // Build identification first, before any slow I/O
    info!("Starting rarexsec-catalogue {}", env!("RAREXSEC_BUILD"));
    info!(
        run_db = %settings.run_db.display(),
        numi_db = %settings.numi_db.display(),
        jobs = settings.jobs,
        xml_files = settings.xml_files.len(),
        dry_run = args.dry_run,
        "Resolved settings"
    );

    match rarexsec_catalogue::build_catalogue(&settings, &args.recipe, args.dry_run).await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Catalogue build aborted: {}", e);
            Err(e.into())
        }
    }
}
