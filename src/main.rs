//! Kestrel CLI entrypoint.
//!
//! This is the main entrypoint for the kestrel command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use kestrel::cli::{Cli, Commands, OutputFormat, OutputFormatter};
use kestrel::config::{ClusterConfig, ClusterPaths, ConfigParser, ConfigValidator, find_config_file};
use kestrel::error::{ConfigError, Result};
use kestrel::orchestrator::Orchestrator;
use kestrel::planner::{ChangeClassifier, SeverityPolicy, TreeSchema};
use kestrel::provisioner::{ClusterProvisioner, ConfigurationProvisioner, InfrastructureProvisioner};
use kestrel::state::LocalStateStore;
use kestrel::ui::{TerminalUi, Ui};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.output == OutputFormat::Json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.output == OutputFormat::Json {
        colored::control::set_override(false);
    }

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a pipeline command needs.
struct Context {
    config: Arc<ClusterConfig>,
    paths: ClusterPaths,
    classifier: ChangeClassifier,
    ui: Arc<dyn Ui>,
    store: LocalStateStore,
}

impl Context {
    fn orchestrator(&self) -> Orchestrator<'_, LocalStateStore> {
        Orchestrator::new(
            &self.store,
            self.classifier.clone(),
            Arc::clone(&self.ui),
            self.paths.cluster_dir(),
        )
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let config_file = resolve_config_path(cli.config.as_ref())?;

    match &cli.command {
        Commands::Validate { warnings } => cmd_validate(&config_file, *warnings, formatter),
        Commands::Diff => cmd_diff(&cli, &config_file, formatter).await,
        Commands::Plan { .. } => cmd_plan(&cli, &config_file, formatter).await,
        Commands::Apply {
            allow_recreate,
            no_show_plan,
            ..
        } => cmd_apply(&cli, &config_file, *allow_recreate, !*no_show_plan, formatter).await,
        Commands::Destroy { .. } => cmd_destroy(&cli, &config_file, formatter).await,
    }
}

/// Validate configuration.
fn cmd_validate(config_file: &Path, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    info!("Validating configuration: {}", config_file.display());

    let config = parser_for(config_file)?.load_file(config_file)?;
    let result = ConfigValidator::new().check(&config);

    eprintln!("{}", formatter.format_validation(&config, &result, show_warnings));

    if result.is_valid() {
        Ok(())
    } else {
        Err(ConfigError::validation_general(format!("{} error(s) found", result.error_count())).into())
    }
}

/// Show the classified changes.
async fn cmd_diff(cli: &Cli, config_file: &Path, formatter: &OutputFormatter) -> Result<()> {
    let ctx = load_context(cli, config_file)?;

    let plan = ctx.orchestrator().plan(&ctx.config).await?;
    eprintln!("{}", formatter.format_plan(&plan));

    Ok(())
}

/// Show the cluster plan and the provisioners' plans.
async fn cmd_plan(cli: &Cli, config_file: &Path, formatter: &OutputFormatter) -> Result<()> {
    let ctx = load_context(cli, config_file)?;
    let mut provisioners = build_provisioners(&ctx, cli.command.playbook(), true)?;

    let (plan, results) = ctx.orchestrator().preview(&ctx.config, &mut provisioners).await?;
    eprintln!("{}", formatter.format_plan(&plan));
    eprintln!("{}", formatter.format_provisioner_plans(&results));

    Ok(())
}

/// Apply the cluster configuration.
async fn cmd_apply(
    cli: &Cli,
    config_file: &Path,
    allow_recreate: bool,
    show_plan: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let ctx = load_context(cli, config_file)?;
    let mut provisioners = build_provisioners(&ctx, cli.command.playbook(), show_plan)?;

    let outcome = ctx
        .orchestrator()
        .with_allow_recreate(allow_recreate)
        .with_plan_report(|plan| eprintln!("{}", formatter.format_plan(plan)))
        .apply(&ctx.config, &mut provisioners)
        .await?;

    eprintln!("{}", formatter.format_outcome(&outcome));
    Ok(())
}

/// Destroy the cluster.
async fn cmd_destroy(cli: &Cli, config_file: &Path, formatter: &OutputFormatter) -> Result<()> {
    let ctx = load_context(cli, config_file)?;
    let mut provisioners = build_provisioners(&ctx, cli.command.playbook(), true)?;

    let outcome = ctx.orchestrator().destroy(&ctx.config, &mut provisioners).await?;

    eprintln!("{}", formatter.format_outcome(&outcome));
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Creates a parser rooted at the configuration file's directory, with `.env` loaded.
fn parser_for(config_file: &Path) -> Result<ConfigParser> {
    let parser = ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;
    Ok(parser)
}

/// Loads and validates the configuration, then resolves everything around it.
fn load_context(cli: &Cli, config_file: &Path) -> Result<Context> {
    debug!("Loading configuration from: {}", config_file.display());

    let config = parser_for(config_file)?.load_file(config_file)?;
    ConfigValidator::new().validate(&config)?;

    let paths = ClusterPaths::resolve(cli.home.clone(), cli.cluster_dir.clone(), config.name())?;
    debug!("Cluster directory: {}", paths.cluster_dir().display());

    let classifier = match &cli.policy {
        Some(path) => ChangeClassifier::new(TreeSchema::cluster()?, SeverityPolicy::load(path)?),
        None => ChangeClassifier::for_cluster()?,
    };

    let mut ui = TerminalUi::new().with_debug(cli.verbose);
    if let Some(answer) = cli.command.preset_answer() {
        ui = ui.with_answer(answer);
    }

    Ok(Context {
        config: Arc::new(config),
        store: LocalStateStore::with_base_dir(paths.cluster_dir()),
        paths,
        classifier,
        ui: Arc::new(ui),
    })
}

/// Creates the provisioners in apply order.
fn build_provisioners(
    ctx: &Context,
    playbook: Option<&PathBuf>,
    show_plan: bool,
) -> Result<Vec<ClusterProvisioner>> {
    let infrastructure =
        InfrastructureProvisioner::new(&ctx.paths, Arc::clone(&ctx.config), Arc::clone(&ctx.ui))?
            .with_show_plan(show_plan);
    let mut provisioners = vec![ClusterProvisioner::from(infrastructure)];

    if let Some(playbook) = playbook {
        let playbook = std::path::absolute(playbook)?;
        let configuration =
            ConfigurationProvisioner::new(&ctx.paths, playbook, Arc::clone(&ctx.config), Arc::clone(&ctx.ui))
                .with_show_plan(show_plan);
        provisioners.push(configuration.into());
    }

    Ok(provisioners)
}
