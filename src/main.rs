use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use relbind::config::CompilerConfig;
use relbind::mapping::MappingSchema;
use relbind::query_compiler::compile;
use relbind::query_compiler::compile_ctx::CompileCtx;
use relbind::query_compiler::evaluator::{execute, Fixture};
use relbind::query_compiler::language::DialectCapabilities;
use relbind::query_dsl::parse_query;

/// relbind - compile LINQ-style queries into relation trees
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML compiler configuration (defaults to RELBIND_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a query and print the compiled tree
    Compile {
        /// YAML entity mapping
        #[arg(long)]
        mapping: PathBuf,

        /// Dialect name overriding the configuration (ansi, tsql, access)
        #[arg(long)]
        dialect: Option<String>,

        #[arg(long, value_enum, default_value_t = Format::Sql)]
        format: Format,

        /// Print the rewriter passes that changed the tree
        #[arg(long)]
        trace: bool,

        query: String,
    },
    /// Compile a query and execute it against a JSON fixture
    Run {
        /// YAML entity mapping
        #[arg(long)]
        mapping: PathBuf,

        /// JSON object of table name to row list
        #[arg(long)]
        data: PathBuf,

        #[arg(long)]
        dialect: Option<String>,

        query: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Sql,
    Json,
    Tree,
}

fn load_context(config: Option<&PathBuf>, mapping: &PathBuf, dialect: Option<&str>) -> anyhow::Result<CompileCtx> {
    let mut config = match config {
        Some(path) => CompilerConfig::from_yaml_file(path)?,
        None => CompilerConfig::from_env()?,
    };
    if let Some(name) = dialect {
        config.dialect = match DialectCapabilities::from_name(name) {
            Some(dialect) => dialect,
            None => bail!("unknown dialect `{}`", name),
        };
    }
    let schema = MappingSchema::from_yaml_file(mapping)
        .with_context(|| format!("loading mapping {}", mapping.display()))?;
    info!("dialect {}, affinity {:?}", config.dialect.name, config.affinity);
    Ok(CompileCtx::from_config(Arc::new(schema), &config))
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Compile {
            mapping,
            dialect,
            format,
            trace,
            query,
        } => {
            let mut ctx = load_context(cli.config.as_ref(), &mapping, dialect.as_deref())?;
            let op = parse_query(&query)?;
            let compiled = compile(&op, &mut ctx)?;
            match format {
                Format::Sql => println!("{}", compiled),
                Format::Json => println!("{}", serde_json::to_string_pretty(&compiled)?),
                Format::Tree => println!("{:#?}", compiled),
            }
            if trace {
                for pass in ctx.transformed_passes() {
                    eprintln!("transformed: {}", pass);
                }
            }
        }
        Command::Run {
            mapping,
            data,
            dialect,
            query,
        } => {
            let mut ctx = load_context(cli.config.as_ref(), &mapping, dialect.as_deref())?;
            let fixture = Fixture::from_json_file(&data)?;
            let op = parse_query(&query)?;
            let compiled = compile(&op, &mut ctx)?;
            let result = execute(&compiled, &fixture)?;
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        }
    }
    Ok(())
}
