//! Seedbase CLI - open, query and delete seed-bootstrapped databases

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use indicatif::HumanDuration;
use seedbase::bootstrap::BootstrapOutcome;
use seedbase::command::{SqlValue, Statement, StatementResult};
use seedbase::config::{self, SeedbaseConfig};
use seedbase::ui::{self, Icons, Spinner, TableBuilder};
use seedbase::{OpenOptions, SessionManager};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "seedbase")]
#[command(version)]
#[command(about = "Session manager for seed-bootstrapped SQLite databases")]
#[command(long_about = r#"
Seedbase locates a valid copy of a named database among ranked storage
locations, or copies it from a bundled seed asset, then runs SQL against it
through a serialized per-database session.

Example usage:
  seedbase init
  seedbase resolve --name dict --expected-size 1048576
  seedbase exec --name dict --sql "SELECT count(*) FROM words"
  seedbase delete --name dict
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default seedbase.toml
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Find or materialize the database file without opening it
    Resolve {
        /// Database name
        #[arg(short, long)]
        name: String,

        /// Expected byte size of a valid file (overrides the config)
        #[arg(short, long)]
        expected_size: Option<u64>,

        /// Print the diagnostic trail
        #[arg(long)]
        show_log: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Open a database and execute a batch of statements
    Exec {
        /// Database name
        #[arg(short, long)]
        name: String,

        /// SQL statement; repeat for a batch, executed in order
        #[arg(short, long = "sql", required = true)]
        sql: Vec<String>,

        /// JSON array of parameters for the statement at the same position
        #[arg(short, long = "params")]
        params: Vec<String>,

        /// Expected byte size of a valid file (overrides the config)
        #[arg(short, long)]
        expected_size: Option<u64>,

        /// Open the database read-only
        #[arg(long)]
        read_only: bool,

        /// Print the diagnostic trail
        #[arg(long)]
        show_log: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete every copy of a database file
    Delete {
        /// Database name
        #[arg(short, long)]
        name: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Init { force } => {
            let base = std::env::current_dir()?;
            let config = SeedbaseConfig {
                locations: config::default_locations_in(&base),
                ..SeedbaseConfig::default()
            };
            config::write_config(&config_path, &config, force)?;
            ui::header(Icons::ROCKET, "Initialized seedbase");
            ui::success(&format!("Wrote {}", config_path.display()));
            ui::info("Seed assets", &config.seed_dir().display().to_string());
            for location in &config.locations {
                ui::info("Location", &location.display().to_string());
            }
        }

        Commands::Resolve { name, expected_size, show_log, format } => {
            let config = load(&config_path)?;
            let options = open_options(&config, &name, expected_size, false)?;
            let manager = SessionManager::from_config(&config);

            let result = manager.resolve(&name, &options);
            if format == "json" {
                let value = match &result {
                    Ok(resolution) => serde_json::json!({
                        "name": name,
                        "path": resolution.path,
                        "outcome": resolution.outcome.as_str(),
                        "trail": resolution.trail,
                    }),
                    Err(e) => serde_json::json!({ "name": name, "error": e.to_string() }),
                };
                println!("{}", serde_json::to_string_pretty(&with_log(value, &manager, show_log))?);
            } else {
                if let Ok(resolution) = &result {
                    let icon = match resolution.outcome {
                        BootstrapOutcome::Reused => Icons::REUSE,
                        BootstrapOutcome::Materialized => Icons::SEED,
                    };
                    ui::header(icon, &format!("Resolved {}", name));
                    let mut table = TableBuilder::new();
                    table.add_row("Path", &resolution.path.display().to_string());
                    table.add_row("Outcome", resolution.outcome.as_str());
                    table.add_row("Expected size", &options.expected_size.to_string());
                    println!("{}", table.build());
                }
                if show_log {
                    ui::diagnostics(&manager.diagnostics());
                }
            }
            result?;
        }

        Commands::Exec { name, sql, params, expected_size, read_only, show_log, format } => {
            let config = load(&config_path)?;
            let options = open_options(&config, &name, expected_size, read_only)?;
            let statements = statements(sql, params)?;
            let manager = SessionManager::from_config(&config);

            let spinner = Spinner::new(&format!("Opening {}", name));
            let opened = manager.open(&name, options).wait();
            let results = match opened {
                Ok(()) => {
                    spinner.set_message(&format!("Executing {} statements", statements.len()));
                    manager.execute_batch(&name, statements).wait()
                }
                Err(e) => Err(e),
            };
            let closed = manager.close(&name).wait();
            spinner.finish();

            if format == "json" {
                let value = match &results {
                    Ok(results) => serde_json::json!({ "name": name, "results": results }),
                    Err(e) => serde_json::json!({ "name": name, "error": e.to_string() }),
                };
                println!("{}", serde_json::to_string_pretty(&with_log(value, &manager, show_log))?);
            } else {
                if let Ok(results) = &results {
                    ui::header(Icons::DATABASE, &name);
                    print_results(results);
                    ui::timing(&format!("{} in {}", name, HumanDuration(spinner.elapsed())));
                }
                if show_log {
                    ui::diagnostics(&manager.diagnostics());
                }
            }
            results?;
            closed?;
        }

        Commands::Delete { name } => {
            let config = load(&config_path)?;
            let manager = SessionManager::from_config(&config);
            manager.delete(&name).wait()?;
            ui::file_deleted(&format!("Deleted {}", name));
        }
    }

    Ok(())
}

fn load(path: &std::path::Path) -> anyhow::Result<SeedbaseConfig> {
    match config::load_config(Some(path))? {
        Some(config) => Ok(config),
        None => {
            ui::warn(&format!("No config at {}, using defaults", path.display()));
            let base = std::env::current_dir()?;
            Ok(SeedbaseConfig {
                locations: config::default_locations_in(&base),
                ..SeedbaseConfig::default()
            })
        }
    }
}

fn open_options(
    config: &SeedbaseConfig,
    name: &str,
    expected_size: Option<u64>,
    read_only: bool,
) -> anyhow::Result<OpenOptions> {
    let configured = config.open_options(name);
    let Some(size) = expected_size.or(configured.map(|o| o.expected_size)) else {
        anyhow::bail!(
            "no expected size for {} (pass --expected-size or add [databases.{}] to the config)",
            name,
            name
        );
    };

    let options = configured.unwrap_or_default();
    Ok(OpenOptions { expected_size: size, ..options }.read_only(options.read_only || read_only))
}

/// Pair each statement with the parameter list at the same position
fn statements(sql: Vec<String>, params: Vec<String>) -> anyhow::Result<Vec<Statement>> {
    if params.len() > sql.len() {
        anyhow::bail!("{} parameter lists given for {} statements", params.len(), sql.len());
    }

    let mut params = params.into_iter();
    sql.into_iter()
        .map(|sql| {
            let Some(raw) = params.next() else {
                return Ok(Statement::new(sql));
            };
            let values: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
            let values = values
                .iter()
                .map(SqlValue::from_json)
                .collect::<seedbase::Result<Vec<_>>>()?;
            Ok(Statement::with_params(sql, values))
        })
        .collect()
}

fn print_results(results: &[StatementResult]) {
    for (i, result) in results.iter().enumerate() {
        match result {
            StatementResult::Success { result } => {
                let table = ui::result_table(result);
                if !table.is_empty() {
                    println!("{}", table);
                } else {
                    let mut line = format!("#{} ok, {} rows affected", i + 1, result.rows_affected);
                    if let Some(id) = result.insert_id {
                        line.push_str(&format!(", insert id {}", id));
                    }
                    ui::success(&line);
                }
                if !result.columns.is_empty() && result.rows.is_empty() {
                    ui::empty("No rows");
                }
            }
            StatementResult::Error { message, code } => match code {
                Some(code) => ui::error(&format!("#{} failed ({}): {}", i + 1, code, message)),
                None => ui::error(&format!("#{} failed: {}", i + 1, message)),
            },
        }
    }
}

fn with_log(mut value: serde_json::Value, manager: &SessionManager, show_log: bool) -> serde_json::Value {
    if show_log {
        value["log"] = serde_json::Value::String(manager.diagnostics());
    }
    value
}
