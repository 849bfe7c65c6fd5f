//! OtaDeploy CLI - Main entry point for CLI binary
//!
//! This binary provides the `otadeploy` tool for releasing and serving firmware.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use otadeploy_lib::engine::{
    api::{create_router, ApiState},
    builder::CommandBuilder,
    cli::{Cli, Commands, OutputFormat},
    config::Config,
    database::{Database, MetadataStore},
    distribution::DistributionEndpoint,
    notifier::{NoopNotifier, Notifier, WebhookNotifier},
    pipeline::{PipelineSettings, ReleaseOrchestrator, ReleaseRequest},
    signer::{self, FirmwareSigner},
    storage::FileObjectStore,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_cli(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Deploy { version, changelog } => {
            cmd_deploy(&cli.config, version, changelog, json_output)?;
        }
        Commands::Serve { port, host } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cmd_serve(&cli.config, host, port))?;
        }
        Commands::Releases { limit } => {
            cmd_releases(&cli.config, limit, json_output)?;
        }
        Commands::Keygen { out, bits } => {
            cmd_keygen(&out, bits, json_output)?;
        }
        Commands::Verify { firmware, signature, public_key } => {
            cmd_verify(&firmware, &signature, &public_key, json_output)?;
        }
    }

    Ok(())
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn cmd_deploy(config_path: &Path, version: Option<String>, changelog: String, json: bool) -> Result<()> {
    let config = Config::load(config_path)?;

    let db = Arc::new(Database::new(&config.database_path).context("Failed to open release database")?);
    let store = Arc::new(
        FileObjectStore::open(&config.storage.root, &config.storage.public_base_url)
            .context("Failed to open object store")?,
    );
    let builder = Arc::new(CommandBuilder::new(
        config.build.project_dir.clone(),
        config.build.command.clone(),
        config.build.artifact.clone(),
    ));
    let notifier: Arc<dyn Notifier> = match &config.notify {
        Some(notify) => Arc::new(WebhookNotifier::new(&notify.webhook_url)?),
        None => Arc::new(NoopNotifier),
    };

    let orchestrator = ReleaseOrchestrator::new(
        db,
        store,
        builder,
        notifier,
        FirmwareSigner::new(&config.private_key),
        PipelineSettings {
            work_dir: config.build.work_dir.clone(),
            distribution_base_url: config.distribution.base_url.clone(),
            notify_topic: config.notify.as_ref().and_then(|n| n.topic.clone()),
        },
    );

    let deployed_by = config.deployed_by.clone().unwrap_or_else(current_user);
    let report = orchestrator
        .run(ReleaseRequest {
            version,
            changelog,
            deployed_by,
        })
        .map_err(|e| {
            let mut message = format!("{}: {}", e.stage(), e);
            if !e.orphaned().is_empty() {
                message.push_str(&format!(" (orphaned blobs: {})", e.orphaned().join(", ")));
            }
            anyhow!(message)
        })?;

    let release = &report.release;
    if json {
        println!("{}", serde_json::json!({
            "success": true,
            "release": release,
            "download_url": report.download_url,
            "notified": report.notified,
        }));
    } else {
        println!("{}", "✅ The firmware has been deployed successfully.".green());
        println!("   Version      : {}", release.version);
        println!("   Deployed By  : {}", release.deployed_by);
        println!("   Changelog    : {}", release.changelog);
        println!("   Checksum     : {}", release.checksum);
        println!("   Firmware URL : {}", report.download_url);
        println!("   Signature URL: {}", release.signature_blob_ref);
        if !report.notified {
            println!("{}", "   ⚠ Devices were not notified; see log output".yellow());
        }
    }

    Ok(())
}

async fn cmd_serve(config_path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::new(&config.database_path)?;
    let store = FileObjectStore::open(&config.storage.root, &config.storage.public_base_url)?;

    let state = ApiState {
        endpoint: DistributionEndpoint::new(Arc::new(store)),
        db: Arc::new(db),
    };
    let app = create_router(state);

    let host = host.unwrap_or(config.distribution.host);
    let port = port.unwrap_or(config.distribution.port);
    let addr = format!("{}:{}", host, port);
    println!("🚀 OtaDeploy firmware server");
    println!("   Objects: {}", config.storage.root.display());
    println!("   Listening: http://{}", addr);
    println!("   Press Ctrl+C to stop");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn cmd_releases(config_path: &Path, limit: usize, json: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::new(&config.database_path)?;
    let releases = db.list_releases(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&releases)?);
    } else if releases.is_empty() {
        println!("No releases recorded");
    } else {
        println!("📦 Releases:");
        for release in &releases {
            println!(
                "   {}  {}  {}  {}",
                release.version.bold(),
                release.created_at.format("%Y-%m-%d %H:%M"),
                release.deployed_by,
                release.changelog
            );
        }
    }

    Ok(())
}

fn cmd_keygen(out: &Path, bits: usize, json: bool) -> Result<()> {
    let private_path = out.join("private.pem");
    let public_path = out.join("public.pem");
    if private_path.exists() {
        return Err(anyhow!("Refusing to overwrite {}", private_path.display()));
    }

    let (private_pem, public_pem) = signer::generate_keypair(bits)?;
    std::fs::create_dir_all(out)?;
    std::fs::write(&private_path, private_pem)?;
    std::fs::write(&public_path, public_pem)?;

    if json {
        println!("{}", serde_json::json!({
            "private_key": private_path.display().to_string(),
            "public_key": public_path.display().to_string(),
        }));
    } else {
        println!("✅ Generated {}-bit RSA key pair", bits);
        println!("   Private: {}", private_path.display());
        println!("   Public : {}", public_path.display());
    }

    Ok(())
}

fn cmd_verify(firmware: &Path, signature: &Path, public_key: &Path, json: bool) -> Result<()> {
    let firmware_bytes = std::fs::read(firmware)
        .with_context(|| format!("Failed to read {}", firmware.display()))?;
    let signature_bytes = std::fs::read(signature)
        .with_context(|| format!("Failed to read {}", signature.display()))?;
    let public_pem = std::fs::read_to_string(public_key)
        .with_context(|| format!("Failed to read {}", public_key.display()))?;

    signer::verify(&firmware_bytes, &signature_bytes, &public_pem)?;
    let checksum = signer::sha256_hex(&firmware_bytes);

    if json {
        println!("{}", serde_json::json!({ "valid": true, "checksum": checksum }));
    } else {
        println!("{}", "✅ Signature valid".green());
        println!("   SHA-256: {}", checksum);
    }

    Ok(())
}
