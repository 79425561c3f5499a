//! pg-provision CLI - PostgreSQL provisioning and bulk loading.

mod progress;

use clap::{Parser, Subcommand};
use pg_provision::config::DEFAULT_PROFILE;
use pg_provision::{
    ColumnSpec, Config, LoadStats, ProvisionError, Provisioner, RoleSpec, RowErrorPolicy,
};
use progress::LoadSpinner;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Exit code used when a load is interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "pg-provision")]
#[command(about = "Provision PostgreSQL databases and bulk-load delimited files")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to a credential profile file (used instead of --config)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Section of the credential profile file to use
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Show a row counter while loading
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the databases on the server
    ListDatabases,

    /// Create a database (skipped if it already exists)
    CreateDatabase {
        /// Name of the database to create
        name: String,
    },

    /// Create a table from a column spec and load a data file into it
    CreateTable {
        /// Delimited data file (.tsv is tab-delimited, anything else comma)
        #[arg(long)]
        data: PathBuf,

        /// YAML column spec (column name to SQL type, in order)
        #[arg(long)]
        spec: PathBuf,

        /// Database that receives the table
        #[arg(long)]
        database: String,

        /// Table name
        #[arg(long)]
        table: String,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Load a data file into an existing table
    Load {
        /// Delimited data file (.tsv is tab-delimited, anything else comma)
        #[arg(long)]
        data: PathBuf,

        /// YAML column spec supplying the insert columns
        #[arg(long, conflicts_with = "columns", required_unless_present = "columns")]
        spec: Option<PathBuf>,

        /// Comma-separated insert columns
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Database holding the table
        #[arg(long)]
        database: String,

        /// Table name
        #[arg(long)]
        table: String,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Grant read-only access on a database to a role
    Grant {
        /// Database to grant on
        #[arg(long)]
        database: String,

        /// Role receiving the grant
        #[arg(long)]
        user: String,

        /// Password for creating the role when it does not exist
        #[arg(long, env = "PG_PROVISION_ROLE_PASSWORD", hide_env_values = true)]
        role_password: Option<String>,
    },

    /// Test the database connection
    HealthCheck,
}

/// Overrides for the `load` section of the configuration.
#[derive(clap::Args)]
struct LoadArgs {
    /// Data file has no header row
    #[arg(long)]
    no_header: bool,

    /// Rows per commit
    #[arg(long)]
    commit_every: Option<usize>,

    /// Skip rows with the wrong number of fields instead of aborting
    #[arg(long)]
    skip_bad_rows: bool,

    /// Value substituted for empty fields
    #[arg(long)]
    null_sentinel: Option<String>,

    /// Leave an existing table alone and load into it
    #[arg(long)]
    skip_existing_table: bool,
}

impl LoadArgs {
    fn apply(&self, config: &mut Config) {
        if self.no_header {
            config.load.has_header = false;
        }
        if let Some(n) = self.commit_every {
            config.load.commit_every = n;
        }
        if self.skip_bad_rows {
            config.load.on_row_error = RowErrorPolicy::Skip;
        }
        if let Some(ref sentinel) = self.null_sentinel {
            config.load.null_sentinel = sentinel.clone();
        }
        if self.skip_existing_table {
            config.load.skip_existing_table = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, ProvisionError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| ProvisionError::Config(e.to_string()))?;

    let mut config = match cli.credentials {
        Some(ref path) => {
            let config = Config::from_credentials(path, &cli.profile, None)?;
            info!("Loaded credential profile '{}' from {:?}", cli.profile, path);
            config
        }
        None => {
            let config = Config::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);
            config
        }
    };

    match cli.command {
        Commands::ListDatabases => {
            let mut provisioner = Provisioner::from_config(&config).await?;
            let databases = provisioner.list_databases().await?;
            provisioner.close().await?;

            if cli.output_json {
                println!("{}", serde_json::json!({ "databases": databases }));
            } else {
                for name in databases {
                    println!("{}", name);
                }
            }
        }

        Commands::CreateDatabase { name } => {
            let mut provisioner = Provisioner::from_config(&config).await?;
            let created = provisioner.create_database(&name).await?;
            provisioner.close().await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({ "database": name, "created": created })
                );
            } else if created {
                println!("Database {} created", name);
            } else {
                println!("Database {} already exists", name);
            }
        }

        Commands::CreateTable {
            data,
            spec,
            database,
            table,
            load,
        } => {
            load.apply(&mut config);
            config.validate()?;
            let spec = ColumnSpec::load(&spec)?;
            let mut provisioner = connect_to(&config, &database).await?;

            let counter = Arc::new(AtomicU64::new(0));
            provisioner = provisioner.with_progress_counter(Arc::clone(&counter));
            let spinner = cli.progress.then(|| LoadSpinner::start(&table, Arc::clone(&counter)));

            let result = tokio::select! {
                result = provisioner.create_table(&data, &database, &table, &spec, &config.load) => result,
                _ = tokio::signal::ctrl_c() => {
                    return Ok(interrupted(&table, &counter));
                }
            };
            finish_spinner(spinner, &counter);
            let stats = result?;
            provisioner.close().await?;
            print_stats(&table, &data, &stats, cli.output_json)?;
        }

        Commands::Load {
            data,
            spec,
            columns,
            database,
            table,
            load,
        } => {
            load.apply(&mut config);
            config.validate()?;
            let columns = match spec {
                Some(path) => ColumnSpec::load(&path)?.insertable_columns(),
                None => columns,
            };
            let mut provisioner = connect_to(&config, &database).await?;

            let counter = Arc::new(AtomicU64::new(0));
            provisioner = provisioner.with_progress_counter(Arc::clone(&counter));
            let spinner = cli.progress.then(|| LoadSpinner::start(&table, Arc::clone(&counter)));

            let result = tokio::select! {
                result = provisioner.load_table(&data, &table, &columns, &config.load) => result,
                _ = tokio::signal::ctrl_c() => {
                    return Ok(interrupted(&table, &counter));
                }
            };
            finish_spinner(spinner, &counter);
            let stats = result?;
            provisioner.close().await?;
            print_stats(&table, &data, &stats, cli.output_json)?;
        }

        Commands::Grant {
            database,
            user,
            role_password,
        } => {
            let role = role_password.map(RoleSpec::new);
            let mut provisioner = connect_to(&config, &database).await?;
            let report = provisioner
                .privileges()
                .grant_read_only(&database, &user, role.as_ref())
                .await?;
            provisioner.close().await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "user": report.user,
                        "role_created": report.role_created,
                        "statements": report.statements,
                    })
                );
            } else {
                if report.role_created {
                    println!("Role {} created", report.user);
                }
                println!("Read-only access on {} granted to {}", database, report.user);
            }
        }

        Commands::HealthCheck => {
            let mut provisioner = Provisioner::from_config(&config).await?;
            let report = provisioner.health_check().await?;
            provisioner.close().await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "database": report.database,
                        "server_version": report.server_version,
                        "latency_ms": report.latency.as_millis() as u64,
                    })
                );
            } else {
                println!("Health Check Results:");
                println!(
                    "  PostgreSQL ({}): OK ({}ms)",
                    report.database,
                    report.latency.as_millis()
                );
                println!("  Server: {}", report.server_version);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Connect to the configured database, then move to `database` if it differs.
async fn connect_to(config: &Config, database: &str) -> Result<Provisioner, ProvisionError> {
    let mut provisioner = Provisioner::from_config(config).await?;
    if provisioner.database() == database {
        return Ok(provisioner);
    }
    if !provisioner.database_exists(database).await? {
        provisioner.close().await?;
        return Err(ProvisionError::schema(format!(
            "database does not exist: {}",
            database
        )));
    }
    provisioner.switch_database(database).await
}

fn finish_spinner(spinner: Option<LoadSpinner>, counter: &AtomicU64) {
    if let Some(spinner) = spinner {
        spinner.finish(counter.load(Ordering::Relaxed));
    }
}

fn interrupted(table: &str, counter: &AtomicU64) -> ExitCode {
    eprintln!(
        "\nInterrupted. {} rows were committed to {}; the open batch was not.",
        counter.load(Ordering::Relaxed),
        table
    );
    ExitCode::from(EXIT_INTERRUPTED)
}

fn print_stats(
    table: &str,
    data: &Path,
    stats: &LoadStats,
    json: bool,
) -> Result<(), ProvisionError> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "table": table,
                "data": data.display().to_string(),
                "rows_read": stats.rows_read,
                "rows_inserted": stats.rows_inserted,
                "rows_skipped": stats.rows_skipped,
                "commits": stats.commits,
                "duration_seconds": stats.duration.as_secs_f64(),
                "rows_per_second": stats.rows_per_second(),
            })
        );
    } else {
        println!("\nLoad completed!");
        println!("  Table: {}", table);
        println!("  Source: {}", data.display());
        println!("  Rows inserted: {}", stats.rows_inserted);
        if stats.rows_skipped > 0 {
            println!("  Rows skipped: {}", stats.rows_skipped);
        }
        println!("  Duration: {:.2}s", stats.duration.as_secs_f64());
        println!("  Throughput: {} rows/sec", stats.rows_per_second());
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
