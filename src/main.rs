//! Tessera command line runner
//!
//! Run with: TESSERA_FIXTURE=fixture.json cargo run < request.json
//!
//! The request is either a query object
//! (`{"datasource": "3__table", "groupby": ["name"], "metrics": ["count"]}`)
//! or ad-hoc SQL (`{"database": "examples", "sql": "SELECT ..."}`).
//!
//! Environment variables:
//! - TESSERA_FIXTURE: JSON fixture with databases, tables and datasets (required)
//! - TESSERA_FORMAT: `json` (default) or `csv`
//! - TESSERA_*: executor settings, see `CoreConfig::from_env`
//! - RUST_LOG: Log level (default: tessera=info)

use std::io::Read;
use std::sync::Arc;

use tessera::backend::Backend;
use tessera::execution::{QueryExecutor, QueryRequest, SubmitOptions};
use tessera::export::to_csv;
use tessera::fixture::Fixture;
use tessera::CoreConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = CoreConfig::from_env();
    let fixture_path = std::env::var("TESSERA_FIXTURE").map_err(|_| "TESSERA_FIXTURE is not set")?;
    let csv = std::env::var("TESSERA_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("csv"));

    let loaded = Fixture::from_path(&fixture_path)?.load()?;
    tracing::info!(fixture = %fixture_path, "Fixture loaded");

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let request: QueryRequest = serde_json::from_str(&input)?;

    let delimiter = config.csv_delimiter;
    let executor = QueryExecutor::builder(loaded.catalog)
        .with_config(config)
        .with_backend("memory", Arc::clone(&loaded.backend) as Arc<dyn Backend>)
        .build();

    let payload = match request {
        QueryRequest::Object(object) => executor.execute(*object, SubmitOptions::new()).await?,
        QueryRequest::Sql(sql) => executor.execute_sql(sql, SubmitOptions::new()).await?,
    };

    match (&payload.result, csv) {
        (Some(result), true) => print!("{}", to_csv(result, delimiter)?),
        _ => println!("{}", serde_json::to_string_pretty(&payload)?),
    }
    Ok(())
}
