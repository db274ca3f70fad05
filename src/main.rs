use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use graphwire::{ClientConfig, Parameters, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "graphwire")]
#[command(about = "Run queries against a graph database server", long_about = None)]
struct Args {
    /// Query to run
    query: Option<String>,

    /// Server URL (overrides graphwire.toml and GRAPHWIRE_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Query parameters as a JSON object
    #[arg(short, long)]
    params: Option<String>,

    /// Records requested per pull
    #[arg(long)]
    fetch_size: Option<u32>,

    /// Print the server catalog instead of running a query
    #[arg(long)]
    catalog: bool,

    /// Directory holding graphwire.toml and .env
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphwire=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ClientConfig::load(&args.config_dir)?;
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(fetch_size) = args.fetch_size {
        config.session.fetch_size = fetch_size;
    }
    let driver = config.build_driver()?;
    tracing::debug!("Using server {}", driver.url());

    let outcome = if args.catalog {
        print_catalog(&driver).await
    } else if let Some(query) = args.query {
        let parameters = match args.params {
            Some(raw) => parse_parameters(&raw)?,
            None => Parameters::new(),
        };
        run_query(&driver, &query, parameters).await
    } else {
        Err(anyhow::anyhow!("Nothing to do: pass a query or --catalog"))
    };

    driver.close().await;
    outcome
}

async fn print_catalog(driver: &graphwire::Driver) -> anyhow::Result<()> {
    let catalog = driver.catalog().await?;
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

/// Print each record as one JSON line, then the summary on stderr.
async fn run_query(
    driver: &graphwire::Driver,
    query: &str,
    parameters: Parameters,
) -> anyhow::Result<()> {
    let session = driver.session()?;
    let result = session.run(query, parameters)?;

    let mut records = result.record_stream();
    let mut count = 0usize;
    while let Some(record) = records.next().await {
        let record = record?;
        println!("{}", serde_json::to_string(&record)?);
        count += 1;
    }

    let summary = result.summary().await?;
    tracing::info!("{} records", count);
    eprintln!("{}", serde_json::to_string(&summary)?);
    session.close().await;
    Ok(())
}

fn parse_parameters(raw: &str) -> anyhow::Result<Parameters> {
    let json: serde_json::Value =
        serde_json::from_str(raw).context("Parameters must be a JSON object")?;
    match json_to_value(json) {
        Value::Map(map) => Ok(map),
        _ => anyhow::bail!("Parameters must be a JSON object"),
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt64(u)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}
