use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use vatwarden_core::ServiceBootstrap;
use vatwarden_server::restorer::{advertised_host, proof_secret_or_generated};
use vatwarden_server::{
    AppConfig, JsonRpcTransport, LocalRestorer, ProcessTerminator, RemotePeerLink, VatInfoService,
    telemetry, watch_signals,
};

#[derive(Parser)]
#[command(name = "vatwarden-server")]
#[command(about = "Runs a vat under its admin control plane", long_about = None)]
struct Cli {
    /// TOML configuration file
    config: Option<PathBuf>,

    /// Print a configuration template and exit
    #[arg(short = 'o', long)]
    output_config: bool,

    /// Write a configuration template to PATH and exit
    #[arg(short = 'w', long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    #[arg(long, env = "VATWARDEN_HOST")]
    host: Option<String>,

    #[arg(long, env = "VATWARDEN_PORT")]
    port: Option<u16>,

    /// Secret signing the identity proof sent to resolvers; random when unset
    #[arg(long, env = "VATWARDEN_PROOF_SECRET", hide_env_values = true)]
    proof_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.output_config {
        print!("{}", AppConfig::template().render()?);
        return Ok(());
    }
    if let Some(path) = cli.write_config {
        std::fs::write(&path, AppConfig::template().render()?)?;
        println!("configuration written to {}", path.display());
        return Ok(());
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.vat.host = Some(host);
    }
    if let Some(port) = cli.port {
        config.vat.port = Some(port);
    }

    telemetry::init_tracing(&config.telemetry.log_filter);
    if let Some(addr) = config.telemetry.metrics_addr {
        telemetry::install_metrics(addr)?;
        info!(%addr, "serving metrics");
    }

    let restorer = Arc::new(LocalRestorer::new(
        advertised_host(config.vat.host.as_deref()),
        proof_secret_or_generated(cli.proof_secret),
    ));
    let running = ServiceBootstrap::new(
        config.service_config(),
        restorer.clone(),
        Arc::new(RemotePeerLink::new()),
        Arc::new(JsonRpcTransport::new()),
        Arc::new(ProcessTerminator),
    )
    .with_main_service(VatInfoService::new(restorer.clone()))
    .start()
    .await?;

    for service in running.services() {
        if let Some(sturdy_ref) = &service.sturdy_ref {
            println!("service: {} sr: {}", service.name, sturdy_ref);
        }
    }
    info!(vat_id = %restorer.base64_vat_id(), "vat started");

    tokio::spawn(watch_signals(running.admin().clone()));
    running.serve().await?;
    Ok(())
}
