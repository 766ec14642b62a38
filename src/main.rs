use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use supabase_rls_migrate::builtin;
use supabase_rls_migrate::config::{ProjectConfig, RunnerOptions, SERVICE_KEY_ENV, URL_ENV};
use supabase_rls_migrate::endpoint::{EndpointCandidate, MIGRATION_RPC};
use supabase_rls_migrate::progress::ConsoleProgress;
use supabase_rls_migrate::report::ManualFallback;
use supabase_rls_migrate::runner::MigrationRunner;
use supabase_rls_migrate::statement::Migration;

#[derive(Parser, Debug)]
#[clap(name = "supabase-rls-migrate", version)]
#[clap(about = "Apply row-level-security SQL to a Supabase project through its RPC endpoints", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    /// Project base URL, e.g. https://<ref>.supabase.co
    #[clap(long, env = URL_ENV, global = true)]
    url: Option<String>,

    /// Service role key; sent as both apikey and bearer token
    #[clap(long, env = SERVICE_KEY_ENV, hide_env_values = true, global = true)]
    service_key: Option<String>,

    /// Endpoint to try, in order: `function`, `function=body_key` or `/raw/path`.
    /// Repeat to build the list. Defaults to execute_migration_sql, exec_sql, execute_sql, /sql.
    #[clap(long = "endpoint", global = true)]
    endpoints: Vec<String>,

    /// Timeout in seconds for each SQL execution call
    #[clap(long, default_value_t = 30, global = true)]
    timeout: u64,

    /// Timeout in seconds for read-only checks
    #[clap(long, default_value_t = 10, global = true)]
    probe_timeout: u64,

    /// Seconds to wait after installing the RPC function before using it
    #[clap(long, default_value_t = 3, global = true)]
    propagation_delay: u64,

    /// Output debug logs to stderr
    #[clap(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply the built-in outcome policy migration, or the statements of a .sql file
    Apply {
        /// SQL file to apply instead of the built-in migration
        #[clap(long)]
        file: Option<PathBuf>,

        /// Install the execute_migration_sql function first
        #[clap(long)]
        install_rpc: bool,

        /// Skip the table reachability check
        #[clap(long)]
        skip_verify: bool,
    },
    /// Install the execute_migration_sql RPC function
    InstallRpc,
    /// Check that the project tables and the RPC function are reachable
    Verify {
        /// Table to read; defaults to the tables of the built-in migration
        #[clap(long = "table")]
        tables: Vec<String>,
    },
    /// Print the SQL and manual instructions without contacting the project
    Print {
        /// SQL file to print instead of the built-in migration
        #[clap(long)]
        file: Option<PathBuf>,
    },
}

fn init_logging(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.try_init();
}

fn project_config(cli: &Cli) -> anyhow::Result<ProjectConfig> {
    let url = cli.url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("Project URL not provided via --url or {} env var", URL_ENV)
    })?;
    let key = cli.service_key.as_deref().ok_or_else(|| {
        anyhow::anyhow!(
            "Service key not provided via --service-key or {} env var",
            SERVICE_KEY_ENV
        )
    })?;
    ProjectConfig::new(url, key).context("Invalid project configuration")
}

fn runner_options(cli: &Cli) -> anyhow::Result<RunnerOptions> {
    let mut options = RunnerOptions::default()
        .with_request_timeout(Duration::from_secs(cli.timeout))
        .with_probe_timeout(Duration::from_secs(cli.probe_timeout))
        .with_propagation_delay(Duration::from_secs(cli.propagation_delay));

    if !cli.endpoints.is_empty() {
        let candidates = cli
            .endpoints
            .iter()
            .map(|spec| spec.parse::<EndpointCandidate>())
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid --endpoint")?;
        options = options.with_candidates(candidates);
    }
    Ok(options)
}

fn load_migration(file: Option<&PathBuf>) -> anyhow::Result<Migration> {
    let migration = match file {
        Some(path) => Migration::from_file(path)
            .with_context(|| format!("Failed to read migration file: {:?}", path))?,
        None => builtin::outcome_policies_migration(),
    };
    if migration.is_empty() {
        anyhow::bail!("Migration {} contains no statements", migration.name);
    }
    for warning in migration.check_idempotent() {
        println!("Warning: {}", warning);
    }
    Ok(migration)
}

fn check_credential(config: &ProjectConfig) {
    match config.credential.claims() {
        Ok(claims) if claims.is_service_role() => {}
        Ok(claims) => println!(
            "Warning: key role is {}, not service_role; policy changes will likely be rejected.",
            claims.role.as_deref().unwrap_or("unknown")
        ),
        Err(err) => log::warn!("could not decode service key claims: {}", err),
    }
}

async fn verify(runner: &MigrationRunner, tables: &[String]) {
    println!("Checking project {}...", runner.config().url);
    for table in tables {
        match runner.check_table(table).await {
            Ok(check) => println!("  {}", check),
            Err(err) => println!("  {}: request failed: {}", table, err),
        }
    }
    match runner.rpc_function_exists(MIGRATION_RPC).await {
        Ok(true) => println!("  {}: installed", MIGRATION_RPC),
        Ok(false) => println!("  {}: not found (run install-rpc to add it)", MIGRATION_RPC),
        Err(err) => println!("  {}: request failed: {}", MIGRATION_RPC, err),
    }
}

/// Runs a migration and prints the summary plus, if needed, the manual fallback.
/// Returns whether every statement succeeded.
async fn apply(runner: &MigrationRunner, migration: &Migration) -> bool {
    let report = runner.run(migration, &mut ConsoleProgress).await;

    println!("\n{}", report);
    match report.manual_fallback(runner.config()) {
        Some(fallback) => {
            println!("\n{}", fallback);
            false
        }
        None => {
            println!("Migration {} applied.", migration.name);
            true
        }
    }
}

/// What `install_rpc` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Install {
    AlreadyPresent,
    Installed,
    Failed,
}

async fn install_rpc(runner: &MigrationRunner) -> Install {
    match runner.rpc_function_exists(MIGRATION_RPC).await {
        Ok(true) => {
            println!("{} is already installed.", MIGRATION_RPC);
            return Install::AlreadyPresent;
        }
        Ok(false) => {}
        Err(err) => log::warn!("could not check for {}: {}", MIGRATION_RPC, err),
    }
    println!("Installing {}...", MIGRATION_RPC);
    if apply(runner, &builtin::install_rpc_migration()).await {
        Install::Installed
    } else {
        Install::Failed
    }
}

fn connect(cli: &Cli) -> anyhow::Result<MigrationRunner> {
    let config = project_config(cli)?;
    let options = runner_options(cli)?;
    check_credential(&config);
    MigrationRunner::new(config, options).context("Failed to build HTTP client")
}

fn print(cli: &Cli, file: Option<&PathBuf>) -> anyhow::Result<()> {
    let migration = load_migration(file)?;
    let config = project_config(cli).ok();
    let fallback = ManualFallback {
        migration: migration.name.clone(),
        dashboard_url: config.as_ref().and_then(ProjectConfig::dashboard_sql_url),
        project_url: config
            .as_ref()
            .map(|c| c.url.to_string())
            .unwrap_or_else(|| "your Supabase project".to_string()),
        pending: (1..=migration.len()).collect(),
        sql: migration.full_sql(),
    };
    println!("{}", fallback);
    Ok(())
}

// --- Main application logic ---

async fn run() -> anyhow::Result<()> {
    dotenv::dotenv().ok(); // Load .env file if present
    let cli = Cli::parse();
    init_logging(cli.debug);

    match &cli.command {
        Commands::Apply {
            file,
            install_rpc: install,
            skip_verify,
        } => {
            let migration = load_migration(file.as_ref())?;
            let runner = connect(&cli)?;
            if !skip_verify && file.is_none() {
                let tables: Vec<String> =
                    builtin::OUTCOME_TABLES.iter().map(|t| t.to_string()).collect();
                verify(&runner, &tables).await;
                println!();
            }
            if *install {
                match install_rpc(&runner).await {
                    Install::Installed => {
                        let delay = runner.options().propagation_delay;
                        println!("Waiting {}s for the function to propagate...", delay.as_secs());
                        tokio::time::sleep(delay).await;
                    }
                    Install::AlreadyPresent => {}
                    Install::Failed => println!("Continuing with the remaining endpoints."),
                }
            }
            apply(&runner, &migration).await;
        }
        Commands::InstallRpc => {
            install_rpc(&connect(&cli)?).await;
        }
        Commands::Verify { tables } => {
            let tables = if tables.is_empty() {
                builtin::OUTCOME_TABLES.iter().map(|t| t.to_string()).collect()
            } else {
                tables.clone()
            };
            verify(&connect(&cli)?, &tables).await;
        }
        // Needs no connection
        Commands::Print { file } => print(&cli, file.as_ref())?,
    }

    // Partial failure still exits 0: the fallback above is the actionable output.
    Ok(())
}

// --- Entry point ---

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
