//! Service Monitor Binary

use clap::{Args, Parser, Subcommand};
use service_monitor::config::LogFormat;
use service_monitor::{
    Config, HttpProber, JsonFileStorage, KNOWN_CLOUD_PROVIDERS, Lifecycle, Result, Service,
    ServiceDraft, ServiceStore, time_ago_now,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "service_monitor", version, about = "Register services and check whether they answer")]
struct Cli {
    /// Directory holding the persisted services
    #[arg(long, env = "SERVICE_MONITOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Do not populate example services into an empty store
    #[arg(long)]
    no_seed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show every registered service
    List,
    /// Register a new service and probe it
    Add(AddArgs),
    /// Probe a single service
    Check { id: String },
    /// Probe every registered service
    Recheck,
    /// Remove a service
    Remove { id: String },
    /// Show the suggested cloud providers
    Providers,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    url: String,
    #[arg(long)]
    ip: String,
    #[arg(long)]
    supported_by: String,
    #[arg(long, default_value = "AWS")]
    cloud_provider: String,
    #[arg(long, default_value_t = 0.0)]
    monthly_cost: f64,
    #[arg(long, default_value = "production")]
    status: Lifecycle,
    #[arg(long, default_value = "")]
    description: String,
}

impl From<AddArgs> for ServiceDraft {
    fn from(args: AddArgs) -> Self {
        ServiceDraft {
            name: args.name,
            url: args.url,
            description: args.description,
            status: args.status,
            ip: args.ip,
            cloud_provider: args.cloud_provider,
            monthly_cost: args.monthly_cost,
            supported_by: args.supported_by,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(data_dir) = cli.data_dir.clone() {
        config.data_dir = data_dir;
    }
    if cli.no_seed {
        config.seed_examples = false;
    }

    initialize_tracing(config.log_format);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if let Command::Providers = cli.command {
        for provider in KNOWN_CLOUD_PROVIDERS {
            println!("{}", provider);
        }
        return Ok(());
    }

    let storage = JsonFileStorage::new(&config.data_dir, &config.storage_key);
    info!("Using service store at {}", storage.path().display());

    let prober = HttpProber::new(config.probe_timeout)?;
    info!("Probe timeout {:?}", prober.timeout());
    let store = if config.seed_examples {
        ServiceStore::open(Arc::new(storage), Arc::new(prober))?
    } else {
        ServiceStore::open_unseeded(Arc::new(storage), Arc::new(prober))?
    };

    match cli.command {
        Command::List => {}
        Command::Add(args) => {
            let service = store.add(args.into())?;
            println!("Added {} ({})", service.name, service.id);
        }
        Command::Check { id } => {
            if !store.check(&id) {
                error!("No service with id {}", id);
                std::process::exit(1);
            }
        }
        Command::Recheck => {
            let dispatched = store.recheck_all();
            info!("Checking {} services", dispatched);
        }
        Command::Remove { id } => {
            if !store.remove(&id) {
                error!("No service with id {}", id);
                std::process::exit(1);
            }
            println!("Removed {}", id);
        }
        Command::Providers => {}
    }

    store.wait_for_probes().await;
    print_services(&store.list());
    Ok(())
}

fn print_services(services: &[Service]) {
    if services.is_empty() {
        println!("No services added yet");
        return;
    }

    for service in services {
        println!(
            "{} {:<24} {:<8} {:>10}  {}",
            if service.is_active { "●" } else { "○" },
            service.name,
            service.reachability().to_string(),
            time_ago_now(service.last_check),
            service.url
        );
        println!(
            "    id={} status={} ip={} cloud={} cost=${:.2}/mo owner={}",
            service.id,
            service.status,
            service.ip,
            service.cloud_provider,
            service.monthly_cost,
            service.supported_by
        );
        if !service.description.is_empty() {
            println!("    {}", service.description);
        }
    }
}

/// Initialize structured logging on stderr
fn initialize_tracing(format: LogFormat) {
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json_layer = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    let pretty_layer = (format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(pretty_layer)
        .init();
}
