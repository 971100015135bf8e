//! kubeseed CLI - single-master Kubernetes bootstrap on DigitalOcean.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kubeseed::bootstrap;
use kubeseed::providers::digitalocean::DigitalOcean;
use kubeseed::providers::CloudProvider;
use kubeseed::{
    ApiServerSan, BootstrapConfig, BootstrapState, Bootstrapper, HostKeyTrust, RemoteExecutor,
    SshExecutor, SystemTools, ToolRunner,
};

/// kubeseed - bootstrap a single-master Kubernetes cluster.
#[derive(Parser)]
#[command(name = "kubeseed")]
#[command(about = "Bootstrap a single-master Kubernetes cluster on DigitalOcean")]
struct Cli {
    /// `DigitalOcean` API token (or set `DIGITALOCEAN_ACCESS_TOKEN` env var).
    #[arg(long, env = "DIGITALOCEAN_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// TOML configuration file. Flags override its values.
    #[arg(long, env = "KUBESEED_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory for keys, certificates and state.
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Cluster name.
    #[arg(long)]
    cluster_name: Option<String>,

    /// Region slug (e.g., nyc1).
    #[arg(long)]
    region: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cluster: key, CA, master droplet, credentials.
    Create {
        /// Continue from the last completed step of a previous run.
        #[arg(long, default_value = "false")]
        resume: bool,

        /// Replace an existing root CA (orphans certificates it signed).
        #[arg(long, default_value = "false")]
        force_root: bool,

        /// Droplet image slug.
        #[arg(long)]
        image: Option<String>,

        /// Droplet size slug.
        #[arg(long)]
        size: Option<String>,

        /// Overlay network CIDR.
        #[arg(long)]
        overlay_cidr: Option<String>,

        /// Host key verification: disabled, accept-new or strict.
        #[arg(long)]
        host_key_trust: Option<HostKeyTrust>,

        /// Final API server certificate address: master-address or placeholder.
        #[arg(long)]
        api_server_san: Option<ApiServerSan>,
    },

    /// Ensure the SSH key exists and is registered; print its fingerprint.
    SshKey,

    /// Create the root CA and initial certificates locally.
    Ca {
        /// Replace an existing root CA (orphans certificates it signed).
        #[arg(long, default_value = "false")]
        force_root: bool,
    },

    /// Show the saved bootstrap state.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Create {
            resume,
            force_root,
            image,
            size,
            overlay_cidr,
            host_key_trust,
            api_server_san,
        } => {
            if let Some(image) = image {
                config = config.with_image(image);
            }
            if let Some(size) = size {
                config = config.with_size(size);
            }
            if let Some(cidr) = overlay_cidr {
                config = config.with_overlay_cidr(cidr);
            }
            if let Some(trust) = host_key_trust {
                config = config.with_host_key_trust(trust);
            }
            if let Some(san) = api_server_san {
                config = config.with_api_server_san(san);
            }
            if force_root {
                config = config.with_force_root(true);
            }

            info!(
                "Creating cluster {} ({}) in {}",
                config.cluster_name,
                config.master_name(),
                config.working_dir.display()
            );

            let bootstrapper = bootstrapper(config, cli.token.as_deref())?;
            let state = bootstrapper.run(resume).await.with_context(|| {
                format!(
                    "bootstrap failed; rerun with --resume to continue (state in {})",
                    bootstrapper.config().working_dir.display()
                )
            })?;

            println!("Cluster:  {}", state.cluster_name);
            if let Some(instance) = &state.instance {
                println!("Master:   {} (id {})", instance.name, instance.id);
            }
            if let Some(address) = &state.master_address {
                println!("Address:  {address}");
            }
        }

        Commands::SshKey => {
            let bootstrapper = bootstrapper(config, cli.token.as_deref())?;
            let fingerprint = bootstrapper.ensure_identity().await?;
            println!("{fingerprint}");
        }

        Commands::Ca { force_root } => {
            if force_root {
                config = config.with_force_root(true);
            }
            config.validate()?;

            let tools: Arc<dyn ToolRunner> = Arc::new(SystemTools);
            let generation = bootstrap::init_ca(&config, tools)?;
            println!("Root CA generation {generation} in {}", config.working_dir.display());
        }

        Commands::Status => {
            let state = BootstrapState::load(&config.working_dir)?.with_context(|| {
                format!("no bootstrap state in {}", config.working_dir.display())
            })?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}

/// Defaults, then the config file, then global flags.
fn load_config(cli: &Cli) -> Result<BootstrapConfig> {
    let mut config = match &cli.config {
        Some(path) => BootstrapConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => BootstrapConfig::default(),
    };

    if let Some(dir) = &cli.working_dir {
        config.working_dir.clone_from(dir);
    }
    if let Some(name) = &cli.cluster_name {
        config.cluster_name.clone_from(name);
    }
    if let Some(region) = &cli.region {
        config = config.with_region(region);
    }
    if cli.verbose {
        config = config.with_verbose(true);
    }

    Ok(config)
}

fn bootstrapper(config: BootstrapConfig, token: Option<&str>) -> Result<Bootstrapper> {
    let token = token.context("DigitalOcean token required (--token or DIGITALOCEAN_ACCESS_TOKEN)")?;

    let provider: Arc<dyn CloudProvider> = Arc::new(
        DigitalOcean::new(token)
            .context("failed to create DigitalOcean client")?
            .with_wait_timeout(config.wait_timeout_secs),
    );

    let tools: Arc<dyn ToolRunner> = Arc::new(SystemTools);
    let identity_file = config.working_dir.join(kubeseed::identity::SSH_PRIVATE_KEY);
    let remote: Arc<dyn RemoteExecutor> = Arc::new(
        SshExecutor::new(Arc::clone(&tools), identity_file)
            .with_trust(config.host_key_trust)
            .with_retry(config.retry),
    );

    Ok(Bootstrapper::new(config, provider, remote, tools))
}
