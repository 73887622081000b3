//! Kongsync CLI entrypoint.
//!
//! This is the main entrypoint for the kongsync command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use kongsync::cli::{Cli, Commands, ImportCommands, OutputFormat, OutputFormatter, StateCommands};
use kongsync::config::{find_config_file, ConfigParser, ConfigValidator, SyncConfig};
use kongsync::error::Result;
use kongsync::kong::KongClient;
use kongsync::reconciler::Reconciler;
use kongsync::state::{LocalStateStore, StateStore, STATE_DIR};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(config, yes, &formatter).await,
        Commands::Status => cmd_status(config, &formatter).await,
        Commands::Drift => cmd_drift(config, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, yes, &formatter).await,
        Commands::Import { command } => cmd_import(config, command, &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new kongsync project in: {}", path.display());

    let config_path = path.join("kongsync.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/kongsync.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.contains(STATE_DIR);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# kongsync")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set KONG_ADMIN_TOKEN if your Admin API needs one");
    eprintln!("  2. Edit kongsync.yaml with your upstreams and targets");
    eprintln!("  3. Run 'kongsync validate' to check your declaration");
    eprintln!("  4. Run 'kongsync plan' to see what will change");
    eprintln!("  5. Run 'kongsync apply' to converge Kong");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let validator = ConfigValidator::new();
    let result = validator.check(&config);

    if formatter.format() == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    } else {
        for error in &result.errors {
            eprintln!("{}", formatter.error(&error.to_string()));
        }
        if show_warnings {
            for warning in &result.warnings {
                eprintln!("{}", formatter.warning(warning));
            }
        }
    }

    // Fails with the first error when the declaration is invalid.
    validator.validate(&config)?;

    if formatter.format() == OutputFormat::Text {
        eprintln!("{}", formatter.success("Configuration is valid!"));
        eprintln!("\nConfiguration summary:");
        eprintln!("  Admin API: {}", config.admin.url);
        eprintln!("  Upstreams: {}", config.upstreams.len());
        eprintln!("  Targets: {}", config.total_targets());
    }

    Ok(())
}

/// Show the plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path)?;
    let client = create_kong_client(&config)?;
    let reconciler = Reconciler::new(&config, &state_store, &client);

    let prepared = reconciler.prepare().await?;

    for address in &prepared.refresh.forgotten {
        eprintln!("{}", formatter.warning(&format!("{address} is gone from Kong")));
    }

    println!("{}", formatter.format_plan(&prepared.plan));

    if detailed && prepared.diff.has_changes() {
        if formatter.format() == OutputFormat::Text {
            eprintln!("\nDetailed changes:");
        }
        println!("{}", formatter.format_diff(&prepared.diff));
    }

    Ok(())
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path)?;
    let client = create_kong_client(&config)?;
    let reconciler = Reconciler::new(&config, &state_store, &client);

    let prepared = reconciler.prepare().await?;

    if !prepared.plan.is_empty() {
        println!("{}", formatter.format_plan(&prepared.plan));

        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let result = reconciler.apply(prepared).await?;
    println!("{}", formatter.format_reconciliation(&result));

    Ok(())
}

/// Show recorded resources.
async fn cmd_status(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path)?;
    let client = create_kong_client(&config)?;
    let reconciler = Reconciler::new(&config, &state_store, &client);

    let state = reconciler.load_state().await?;
    println!("{}", formatter.format_status(&state));

    Ok(())
}

/// Check for drift.
async fn cmd_drift(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path)?;
    let client = create_kong_client(&config)?;

    let report = Reconciler::new(&config, &state_store, &client)
        .check_drift()
        .await?;

    println!("{}", formatter.format_drift(&report));

    Ok(())
}

/// Delete every recorded upstream.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path)?;
    let client = create_kong_client(&config)?;
    let reconciler = Reconciler::new(&config, &state_store, &client);

    let state = reconciler.load_state().await?;
    if state.is_empty() {
        eprintln!("No upstreams recorded, nothing to destroy.");
        return Ok(());
    }

    eprintln!("The following upstreams and their targets will be deleted:");
    for (name, upstream) in &state.upstreams {
        eprintln!("  - {name} ({}, {} targets)", upstream.id, upstream.targets.len());
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let result = reconciler.destroy().await?;
    println!("{}", formatter.format_destroy(&result));

    Ok(())
}

/// Adopt existing Kong objects.
async fn cmd_import(
    config_path: Option<&PathBuf>,
    command: ImportCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_config_and_state(config_path)?;
    let client = create_kong_client(&config)?;
    let reconciler = Reconciler::new(&config, &state_store, &client);

    let message = match command {
        ImportCommands::Upstream { name, id } => {
            let upstream = reconciler.import_upstream(&name, &id).await?;
            format!("Imported upstream {name} ({}, {} slots)", upstream.id, upstream.slots)
        }
        ImportCommands::Target { upstream, id } => {
            let target = reconciler.import_target(&upstream, &id).await?;
            format!(
                "Imported target {upstream}/{} ({}, weight {})",
                target.target, target.id, target.weight
            )
        }
    };

    println!("{}", formatter.success(&message));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, state_store) = load_config_and_state(config_path)?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                let lock = state_store.lock_info().await?;
                println!("{}", formatter.format_state(&state, lock.as_ref()));
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let lock = state_store.acquire_lock(holder.as_deref().unwrap_or("")).await?;
            println!("{}", formatter.success(&format!("State locked: {}", lock.lock_id)));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                let message = match state_store.force_unlock().await? {
                    Some(lock) => format!("Removed state lock held by {lock}"),
                    None => String::from("State was not locked."),
                };
                println!("{}", formatter.success(&message));
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                println!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("{}", formatter.warning("Please provide --lock-id or use --force"));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory holding the configuration file.
fn config_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads configuration and creates the state store next to it.
fn load_config_and_state(config_path: Option<&PathBuf>) -> Result<(SyncConfig, LocalStateStore)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    ConfigValidator::new().validate(&config)?;

    let state_store = LocalStateStore::for_config(&config_file, config.state.path.as_deref());
    debug!("Using state file: {}", state_store.location());

    Ok((config, state_store))
}

/// Creates a Kong Admin API client.
fn create_kong_client(config: &SyncConfig) -> Result<KongClient> {
    let client = KongClient::with_timeout(&config.admin.url, config.admin.timeout_secs)?;

    Ok(match ConfigParser::get_admin_token() {
        Some(token) => client.with_token(&config.admin.token_header, &token),
        None => client,
    })
}

/// Prompts on stderr and compares the answer.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}
