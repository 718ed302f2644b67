use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use nl2sql::config::AppConfig;
use nl2sql::NlQueryService;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Answer natural-language questions about the bike-share dataset")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate SQL, run it and print the answer
    Ask {
        /// The question in natural language
        question: String,
    },
    /// Generate SQL only and print the generation result as JSON
    Sql {
        question: String,
    },
    /// Validate and run a SQL statement
    Run {
        sql: String,
    },
    /// Print the schema used as prompt context
    Schema {
        /// Re-read the catalog instead of using the cached snapshot
        #[arg(long)]
        refresh: bool,

        /// Print the `table.column` universe instead of the schema text
        #[arg(long)]
        columns: bool,
    },
    /// Check that the database answers
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;
    info!(
        "Matcher: {:?}, model configured: {}",
        config.matching.strategy,
        config.has_model()
    );
    let service = NlQueryService::from_config(&config)?;

    match args.command {
        Command::Ask { question } => {
            let answer = service.ask(&question).await;
            if let Some(sql) = &answer.sql {
                println!("SQL:\n{}\n", sql);
            }
            match (&answer.result, &answer.error) {
                (Some(result), _) => println!("{}", result),
                (None, Some(error)) => bail!("{}", error),
                (None, None) => bail!("No answer produced"),
            }
        }
        Command::Sql { question } => {
            let response = service.generate_sql(&question).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.error.is_some() {
                std::process::exit(1);
            }
        }
        Command::Run { sql } => {
            let result = service.execute_query(&sql).await;
            println!("{}", service.format_result_for_user(&result));
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Schema { refresh, columns } => {
            let snapshot = service.discover_schema(refresh).await?;
            if columns {
                for column in snapshot.all_columns() {
                    println!("{}", column);
                }
            } else {
                println!("{}", snapshot.schema_text());
            }
        }
        Command::Health => {
            let report = service.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_healthy() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
