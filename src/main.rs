use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use bantay_service::api::{Api, ApiRequest};
use bantay_service::client::{
    ClientStatusStore, HttpBackend, LocalBackend, StatusBackend, ui_mode_of,
};
use bantay_service::config::Config;
use bantay_service::dev_mode::ReplaySource;
use bantay_service::ingest::{CompositeSource, ReadingsSource};
use bantay_service::logging::{self, DataSource};
use bantay_service::model::HomeLocation;
use bantay_service::query::StatusQuery;
use bantay_service::reconcile::Reconciler;
use bantay_service::stations;
use bantay_service::store;
use bantay_service::users::UserService;
use bantay_service::verify;

#[derive(Parser)]
#[command(name = "bantay")]
#[command(about = "Threat status classification, publishing and polling")]
struct Cli {
    /// Optional TOML configuration file; environment values take precedence
    #[arg(short, long, env = "BANTAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify fresh readings and publish the status if it changed
    Reconcile {
        /// Keep running, one cycle every N minutes
        #[arg(long)]
        every_minutes: Option<u64>,
        /// Replay recorded readings snapshots instead of live sources
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Print the published status as clients see it
    Status,
    /// Record a user's safe acknowledgment
    MarkSafe {
        #[arg(long)]
        user: String,
    },
    /// Save a user's home location
    SaveLocation {
        #[arg(long)]
        user: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long)]
        address: Option<String>,
    },
    /// Health probe
    Health,
    /// Run one request through the HTTP handlers
    Invoke {
        method: String,
        path: String,
        body: Option<String>,
    },
    /// Probe configured sources and the store
    Verify {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a client status store and print its state after each poll
    Watch {
        #[arg(long, default_value_t = 3)]
        cycles: u32,
        /// Use the services in-process instead of API_BASE_URL
        #[arg(long)]
        local: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };

    logging::init_logger(config.logging.level, config.logging.file.as_deref(), true);

    match run(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(source = %DataSource::System, "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> Result<ExitCode, Box<dyn Error>> {
    match command {
        Command::Reconcile { every_minutes, replay } => reconcile(config, every_minutes, replay),
        Command::Status => {
            let query = StatusQuery::new(store::connect(&config.store)?);
            println!("{}", serde_json::to_string_pretty(&query.current())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::MarkSafe { user } => {
            let users = UserService::new(store::connect(&config.store)?);
            let ack = users.mark_safe(&user)?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::SaveLocation { user, lat, lng, address } => {
            let users = UserService::new(store::connect(&config.store)?);
            let saved = users.save_location(&user, HomeLocation { lat, lng, address })?;
            println!("Saved {} (version {})", saved.path, saved.version);
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => invoke(config, ApiRequest::get("/health")),
        Command::Invoke { method, path, body } => {
            invoke(config, ApiRequest::new(&method, &path, body.as_deref()))
        }
        Command::Verify { json } => {
            let report = verify::verify_configuration(config);
            verify::print_summary(&report);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            let healthy = report.summary.store_working && report.summary.sources_failed == 0;
            Ok(if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Watch { cycles, local } => watch(config, cycles, local),
    }
}

fn reconcile(
    config: &Config,
    every_minutes: Option<u64>,
    replay: Option<PathBuf>,
) -> Result<ExitCode, Box<dyn Error>> {
    let source: Box<dyn ReadingsSource> = match replay {
        Some(path) => Box::new(ReplaySource::from_file(&path)?),
        None => Box::new(CompositeSource::from_config(&config.sources)?),
    };
    let reconciler = Reconciler::new(store::connect(&config.store)?, source, config.classifier);

    let Some(minutes) = every_minutes else {
        let outcome = reconciler.run_cycle()?;
        println!("{}", outcome);
        return Ok(ExitCode::SUCCESS);
    };

    let interval = Duration::from_secs(minutes.max(1) * 60);
    tracing::info!(source = %DataSource::System, "reconciling every {} minutes", minutes.max(1));
    let (mut total, mut failed) = (0usize, 0usize);
    loop {
        total += 1;
        match reconciler.run_cycle() {
            Ok(outcome) => tracing::info!(source = %DataSource::System, "cycle {}: {}", total, outcome),
            Err(e) => {
                failed += 1;
                tracing::error!(source = %DataSource::System, "cycle {} failed: {}", total, e);
            }
        }
        if total % 12 == 0 {
            logging::log_batch_summary(DataSource::System, "reconcile cycles", total, total - failed, failed);
        }
        thread::sleep(interval);
    }
}

fn invoke(config: &Config, request: ApiRequest) -> Result<ExitCode, Box<dyn Error>> {
    let api = Api::new(store::connect(&config.store)?);
    let response = api.handle(&request);
    println!("HTTP {}", response.status);
    match response.json_body() {
        Ok(body) if !body.is_null() => println!("{}", serde_json::to_string_pretty(&body)?),
        _ => println!("{}", response.body),
    }
    Ok(if response.status < 400 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn watch(config: &Config, cycles: u32, local: bool) -> Result<ExitCode, Box<dyn Error>> {
    let backend: Arc<dyn StatusBackend> = if local {
        Arc::new(LocalBackend::new(store::connect(&config.store)?))
    } else {
        Arc::new(HttpBackend::new(&config.client.api_base_url)?)
    };

    let client = ClientStatusStore::init(backend, &config.client);
    let user = client.init_user()?;
    if !client.snapshot().has_completed_onboarding {
        // Default home: the first registry station
        let home = stations::STATION_REGISTRY
            .first()
            .map(|s| HomeLocation {
                lat: s.location.lat,
                lng: s.location.lng,
                address: Some(s.name.to_string()),
            })
            .ok_or("station registry is empty")?;
        client.complete_onboarding(home)?;
    } else {
        client.app_started()?;
    }
    println!("Watching as {} every {}s", user.id, config.client.poll_interval.as_secs());

    for cycle in 1..=cycles {
        let wait = if cycle == 1 { Duration::from_secs(1) } else { config.client.poll_interval };
        thread::sleep(wait);
        let snapshot = client.snapshot();
        println!(
            "[{}] {:?} level={} checked={} nearby={}",
            cycle,
            ui_mode_of(&snapshot),
            snapshot.current_status,
            snapshot
                .last_checked
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
            snapshot.nearby_sensors.len()
        );
    }

    client.teardown();
    Ok(ExitCode::SUCCESS)
}
