//! conflux main entry point
//!
//! This binary serves as the CLI and as the service entry point. It handles
//! CLI parsing, logging setup, and dispatch to the library.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use conflux::{
    config::{
        validation, ConfigStore, ConfluxConfig, Settings, DEFAULT_GUARDIAN_URL, DEFAULT_VEIL_HOST,
        DEFAULT_VEIL_PORT,
    },
    control::{ApiRequest, ControlAction, ControlClient},
    logging::{self, LogHandle},
    registration::{GuardianClient, RegistrationRequest},
    runtime,
    service::{RemoveOutcome, ServiceMode},
    Conflux, ConfluxError, APP_NAME, VERSION,
};

/// VeilNet conflux controller
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file path
    #[arg(
        long,
        global = true,
        env = "CONFLUX_SETTINGS",
        default_value = "/etc/conflux/conflux.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller in the foreground with the saved config (service entry point)
    Run,

    /// Save the config and install the service
    Up(UpArgs),

    /// Remove the service
    Down,

    /// Register with the Guardian, then continue as `up`
    Register(RegisterArgs),

    /// Unregister from the Guardian, delete the config and remove the service
    Unregister {
        /// The registration token
        #[arg(short = 't', long, env = "VEILNET_REGISTRATION_TOKEN")]
        registration_token: String,
    },

    /// Manage taints
    Taint {
        #[command(subcommand)]
        command: TaintCommand,
    },

    /// Show service and anchor status
    Status,

    /// Start the installed service
    Start,

    /// Stop the installed service
    Stop,

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum TaintCommand {
    /// Add a taint (e.g. key=value)
    Add {
        /// The taint to add
        taint: String,
    },
    /// Remove a taint
    Remove {
        /// The taint to remove
        taint: String,
    },
}

/// Settings shared by `up` and `register`
#[derive(Args, Debug)]
struct ConnectArgs {
    /// The Guardian URL (authentication server)
    #[arg(long, env = "VEILNET_GUARDIAN", default_value = DEFAULT_GUARDIAN_URL)]
    guardian: String,

    /// The tunnel coordinator host
    #[arg(long, env = "VEILNET_VEIL", default_value = DEFAULT_VEIL_HOST)]
    veil: String,

    /// The tunnel coordinator port
    #[arg(long, env = "VEILNET_VEIL_PORT", default_value_t = DEFAULT_VEIL_PORT)]
    veil_port: u16,

    /// Enable rift mode
    #[arg(short, long, env = "VEILNET_RIFT")]
    rift: bool,

    /// The IP of the conflux
    #[arg(long, env = "VEILNET_CONFLUX_IP")]
    ip: Option<String>,

    /// Taints for the conflux, comma separated
    #[arg(long, env = "VEILNET_CONFLUX_TAINTS", value_delimiter = ',')]
    taints: Vec<String>,

    /// Run in the foreground with debug logging instead of installing the service
    #[arg(short, long, env = "VEILNET_DEBUG")]
    debug: bool,
}

#[derive(Args, Debug)]
struct UpArgs {
    /// The conflux ID, keep it secret
    #[arg(short = 'c', long, env = "VEILNET_CONFLUX_ID")]
    conflux_id: String,

    /// The conflux token, keep it secret
    #[arg(short = 't', long, env = "VEILNET_CONFLUX_TOKEN")]
    token: String,

    #[command(flatten)]
    connect: ConnectArgs,
}

#[derive(Args, Debug)]
struct RegisterArgs {
    /// The registration token
    #[arg(short = 't', long, env = "VEILNET_REGISTRATION_TOKEN")]
    registration_token: String,

    /// The tag for the conflux
    #[arg(long, env = "VEILNET_CONFLUX_TAG")]
    tag: Option<String>,

    /// The JWT for the conflux
    #[arg(long, env = "VEILNET_CONFLUX_JWT")]
    jwt: Option<String>,

    /// The JWKS URL for the conflux
    #[arg(long, env = "VEILNET_CONFLUX_JWKS_URL")]
    jwks_url: Option<String>,

    /// The audience for the conflux
    #[arg(long, env = "VEILNET_CONFLUX_AUDIENCE")]
    audience: Option<String>,

    /// The issuer for the conflux
    #[arg(long, env = "VEILNET_CONFLUX_ISSUER")]
    issuer: Option<String>,

    #[command(flatten)]
    connect: ConnectArgs,
}

impl ConnectArgs {
    fn to_config(&self, conflux_id: String, token: String, tag: Option<String>) -> ConfluxConfig {
        ConfluxConfig {
            conflux_id,
            token,
            guardian: self.guardian.clone(),
            veil: self.veil.clone(),
            veil_port: self.veil_port,
            rift: self.rift,
            ip: self.ip.clone().filter(|ip| !ip.is_empty()),
            tag,
            taints: self.taints.iter().filter(|t| !t.is_empty()).collect(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config);
    let (verbose, log_file) = match &settings {
        Ok(s) => (cli.verbose || s.logging.debug, s.logging.file.clone()),
        Err(_) => (cli.verbose, None),
    };

    let log = match logging::init_logging(verbose, log_file.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match settings {
        Ok(settings) => run(cli, settings, log).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Run the CLI command
async fn run(cli: Cli, settings: Settings, log: LogHandle) -> anyhow::Result<()> {
    let store = ConfigStore::from_dir(settings.store.config_dir.as_deref());
    let conflux = Conflux::new();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let mode = ServiceMode::detect();
            if mode == ServiceMode::Daemon && !cli.verbose && !settings.logging.debug {
                log.disable_debug()?;
            }
            info!("Starting {} v{}", APP_NAME, VERSION);
            conflux.run(&settings, &store).await?;
        }
        Commands::Up(args) => {
            let config = args
                .connect
                .to_config(args.conflux_id, args.token, None);
            config.validate()?;
            store.save(&config)?;
            bring_up_or_install(&conflux, &settings, config, Some(store), args.connect.debug, &log)
                .await?;
        }
        Commands::Down => {
            report_removal(&conflux, conflux.remove()?);
        }
        Commands::Register(args) => {
            let request = RegistrationRequest {
                registration_token: args.registration_token,
                guardian: args.connect.guardian.clone(),
                tag: args.tag.clone().unwrap_or_default(),
                jwt: args.jwt.unwrap_or_default(),
                jwks_url: args.jwks_url.unwrap_or_default(),
                audience: args.audience.unwrap_or_default(),
                issuer: args.issuer.unwrap_or_default(),
                ip: args.connect.ip.clone().unwrap_or_default(),
            };

            let guardian = args.connect.guardian.clone();
            let registered = tokio::task::spawn_blocking(move || {
                GuardianClient::new(&guardian).register(&request)
            })
            .await??;

            let config = args
                .connect
                .to_config(registered.conflux_id, registered.token, args.tag);
            config.validate()?;

            let store = if args.connect.debug {
                None
            } else {
                store.save(&config)?;
                Some(store)
            };
            bring_up_or_install(&conflux, &settings, config, store, args.connect.debug, &log)
                .await?;
        }
        Commands::Unregister { registration_token } => {
            let config = store.load().map_err(|e| {
                anyhow::anyhow!("failed to load config, this instance may not be registered: {}", e)
            })?;

            tokio::task::spawn_blocking(move || {
                GuardianClient::new(&config.guardian).unregister(&registration_token, &config)
            })
            .await??;

            store.delete()?;
            report_removal(&conflux, conflux.remove()?);
        }
        Commands::Taint { command } => {
            let (action, taint) = match command {
                TaintCommand::Add { taint } => (ControlAction::AddTaint, taint),
                TaintCommand::Remove { taint } => (ControlAction::RemoveTaint, taint),
            };
            update_taint(&settings, &store, action, &taint).await?;
        }
        Commands::Status => {
            let state = conflux.status()?;
            println!("Service {}: {}", conflux.label(), state);

            let client = ControlClient::new(&settings.control.socket_path);
            match client.call(&ApiRequest::new(ControlAction::Status)).await {
                Ok(Some(data)) => println!("{}", serde_json::to_string_pretty(&data)?),
                Ok(None) => {}
                Err(ConfluxError::TransportUnavailable(_)) => {
                    println!("Controller is not running");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Start => {
            conflux.start()?;
            println!("Service {} started", conflux.label());
        }
        Commands::Stop => {
            conflux.stop()?;
            println!("Service {} stopped", conflux.label());
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
        }
    }

    Ok(())
}

/// Either run in the foreground (debug) or install the service
async fn bring_up_or_install(
    conflux: &Conflux,
    settings: &Settings,
    config: ConfluxConfig,
    store: Option<ConfigStore>,
    debug: bool,
    log: &LogHandle,
) -> anyhow::Result<()> {
    if debug {
        log.set_level("debug")?;
        info!("Debug mode: running conflux {} in the foreground", config.conflux_id);
        runtime::run(settings, &config, store, runtime::shutdown_signal()).await?;
        return Ok(());
    }

    conflux.install()?;
    println!("Service {} installed", conflux.label());
    Ok(())
}

/// Apply a taint change through the running controller, or to the saved config
async fn update_taint(
    settings: &Settings,
    store: &ConfigStore,
    action: ControlAction,
    taint: &str,
) -> anyhow::Result<()> {
    let add = action == ControlAction::AddTaint;
    if add {
        validation::validate_taint(taint)?;
    }

    let client = ControlClient::new(&settings.control.socket_path);
    match client.call(&ApiRequest::with_taint(action, taint)).await {
        Ok(_) => {
            info!("Applied taint change {:?} for {:?}", action, taint);
            return Ok(());
        }
        Err(ConfluxError::TransportUnavailable(e)) => {
            warn!("Controller not reachable ({}), updating saved config only", e);
        }
        Err(e) => return Err(e.into()),
    }

    let changed = store.update(|config| {
        if add {
            config.taints.add(taint)
        } else {
            config.taints.remove(taint)
        }
    })?;

    if changed {
        info!("Updated saved taints; the change applies on next start");
    } else {
        info!("Saved taints already up to date");
    }
    Ok(())
}

fn report_removal(conflux: &Conflux, outcome: RemoveOutcome) {
    match outcome {
        RemoveOutcome::Removed => println!("Service {} removed", conflux.label()),
        RemoveOutcome::AlreadyAbsent => println!("Service {} was not installed", conflux.label()),
    }
}
