//! unifaas CLI entry point.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use unifaas::api::state::AppState;
use unifaas::config::ProviderConfig;
use unifaas::{api, machine, network, oci, ApiDoc, FunctionStore, ImageStore, MachineService};
use utoipa::OpenApi;

/// unifaas - function-as-a-service control plane for unikernel microVMs.
#[derive(Parser, Debug)]
#[command(name = "unifaas")]
#[command(about = "FaaS control plane for unikernel microVMs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the provider control plane.
    Provider(ProviderCmd),
    /// Export the OpenAPI document.
    Openapi(OpenapiCmd),
}

#[derive(Args, Debug)]
struct ProviderCmd {
    /// Set to "Always" to force a pull of images upon deployment, or
    /// "IfNotPresent" to use a cached image.
    #[arg(long, default_value = "IfNotPresent")]
    pull_policy: String,
}

#[derive(Args, Debug)]
struct OpenapiCmd {
    /// Output file path (defaults to stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Provider(cmd) => run_provider(cmd).await,
        Commands::Openapi(cmd) => export_openapi(cmd),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("unifaas=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_provider(cmd: ProviderCmd) -> unifaas::Result<()> {
    let mut config = ProviderConfig::load()?;
    config.pull_policy = cmd.pull_policy.parse()?;

    tracing::info!(
        version = unifaas::VERSION,
        write_timeout = ?config.write_timeout,
        "unifaas provider starting"
    );

    write_network_files()?;

    // Plug-in registries: built-ins first, externally registered drivers
    // resolved by their configured names.
    network::register_builtin();
    let manifest_store = oci::manifest_stores().resolve(&config.oci_store, &config)?;
    let machine_driver =
        machine::driver::machine_drivers().resolve(&config.machine_driver, &config)?;
    let network_driver =
        network::driver::network_drivers().resolve(&config.network_driver, &config)?;
    let volume_service = network::driver::volume_services()
        .resolve(unifaas::config::LAYER_VOLUME_DRIVER, &config)?;
    let endpoints = network::endpoint_managers().resolve(&config.endpoint_mode, &config)?;

    let images = Arc::new(ImageStore::new(
        manifest_store,
        config.oci_root.clone(),
        std::env::consts::ARCH.to_string(),
    ));
    let functions = Arc::new(FunctionStore::new(images));
    let machines = Arc::new(MachineService::new(
        machine_driver,
        network_driver,
        volume_service,
        endpoints.clone(),
        &config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(machines.clone().run_health_checks(shutdown_rx.clone()));
    {
        let endpoints = endpoints.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { endpoints.run_health_checks(shutdown_rx).await });
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config, functions, machines, endpoints));
    let router = api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    tracing::info!("provider stopped");
    Ok(())
}

/// Instances resolve names through files in the working directory.
fn write_network_files() -> unifaas::Result<()> {
    let wd = std::env::current_dir()?;
    std::fs::write(
        wd.join("hosts"),
        "127.0.0.1\tlocalhost\n127.0.0.1\tunifaas.dev\n",
    )?;
    std::fs::write(wd.join("resolv.conf"), "nameserver 8.8.8.8\n")?;
    Ok(())
}

fn export_openapi(cmd: OpenapiCmd) -> unifaas::Result<()> {
    let document = ApiDoc::openapi()
        .to_pretty_json()
        .map_err(|e| unifaas::Error::config("render openapi", e))?;
    match cmd.output {
        Some(path) => std::fs::write(path, document)?,
        None => println!("{}", document),
    }
    Ok(())
}
