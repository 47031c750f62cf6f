//! Command-line interface for magma
//!
//! # Usage Examples
//!
//! ```bash
//! # List tables
//! magma --config magma.toml tables study
//!
//! # Describe variables
//! magma --config magma.toml variables study people
//!
//! # Show the values of one entity
//! magma --config magma.toml values study people 1001
//!
//! # Copy a CSV table into another datasource
//! magma --config magma.toml copy study people archive --as people_2024
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use magma::{Magma, MagmaConfig, TableCopier};
use magma_core::{Datasource, Value, ValueTable, VariableEntity};

#[derive(Parser)]
#[command(name = "magma")]
#[command(about = "Inspect and copy typed value tables")]
#[command(long_about = None)]
struct Cli {
    /// Datasource configuration file (.toml, .yaml or .yml)
    #[arg(long, env = "MAGMA_CONFIG", default_value = "magma.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tables of a datasource
    Tables {
        /// Datasource name
        datasource: String,
    },

    /// Print the variables of a table as JSON
    Variables {
        /// Datasource name
        datasource: String,

        /// Table name
        table: String,
    },

    /// Print the values of one entity
    Values {
        /// Datasource name
        datasource: String,

        /// Table name
        table: String,

        /// Entity identifier
        entity_id: String,
    },

    /// Copy a table into another datasource
    Copy {
        /// Source datasource name
        from: String,

        /// Source table name
        table: String,

        /// Destination datasource name
        to: String,

        /// Destination table name (default: the source table name)
        #[arg(long = "as", value_name = "NAME")]
        rename: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = MagmaConfig::from_file(&cli.config)?;
    let magma = Magma::from_config(&config).context("Failed to initialise datasources")?;

    let result = execute(&magma, cli.command);
    magma.shutdown().context("Failed to shut down datasources")?;
    result
}

fn execute(magma: &Magma, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Tables { datasource } => {
            for name in magma.datasource(&datasource)?.value_table_names()? {
                println!("{name}");
            }
        }
        Commands::Variables { datasource, table } => {
            let table = magma.datasource(&datasource)?.value_table(&table)?;
            let variables = table.variables()?;
            println!("{}", serde_json::to_string_pretty(&variables)?);
        }
        Commands::Values {
            datasource,
            table,
            entity_id,
        } => {
            let table = magma.datasource(&datasource)?.value_table(&table)?;
            let entity = VariableEntity::new(table.entity_type(), entity_id)?;
            let value_set = table.value_set(&entity)?;
            for variable in table.variables()? {
                let value = table.value(variable.name(), &value_set)?;
                println!("{}\t{}", variable.name(), display(&value));
            }
        }
        Commands::Copy {
            from,
            table,
            to,
            rename,
        } => {
            let source = magma.datasource(&from)?.value_table(&table)?;
            let destination = magma.datasource(&to)?;
            let mut copier = TableCopier::new(source.as_ref(), destination.as_ref());
            if let Some(name) = rename {
                copier = copier.with_name(name);
            }
            let report = copier
                .copy()
                .with_context(|| format!("Failed to copy {from}.{table} to {to}"))?;
            println!("{report}");
        }
    }
    Ok(())
}

fn display(value: &Value) -> String {
    value.to_literal().unwrap_or_else(|| "null".to_string())
}
