use anyhow::{Context, bail};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use common::config::Settings;
use pipeline::Mode;
use std::path::Path;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/pipeline.toml";

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Sets a custom config file")
}

fn cli() -> Command {
    Command::new("Truck Transaction Pipeline")
        .version("1.0")
        .about("Moves food-truck transactions from object storage into the warehouse")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("historical")
                .about("Backfill the historical parquet files")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("incremental")
                .about("Load the most recent hour buckets")
                .arg(config_arg())
                .arg(
                    Arg::new("hours")
                        .long("hours")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u32).range(1..))
                        .help("Number of hour buckets to process, newest first"),
                ),
        )
        .subcommand(
            Command::new("load")
                .about("Upload an already staged CSV")
                .arg(config_arg())
                .arg(
                    Arg::new("file")
                        .short('f')
                        .long("file")
                        .value_name("FILE")
                        .required(true)
                        .help("Staged dataset to upload"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_parser(["historical", "incremental"])
                        .default_value("incremental")
                        .help("Whose load policy to apply"),
                ),
        )
        .subcommand(
            Command::new("summary")
                .about("Print transaction aggregates as JSON")
                .arg(config_arg())
                .arg(
                    Arg::new("date")
                        .long("date")
                        .value_name("YYYY-MM-DD")
                        .conflicts_with_all(["from", "to"])
                        .help("Single day, defaults to yesterday"),
                )
                .arg(
                    Arg::new("from")
                        .long("from")
                        .value_name("YYYY-MM-DD")
                        .requires("to"),
                )
                .arg(
                    Arg::new("to")
                        .long("to")
                        .value_name("YYYY-MM-DD")
                        .requires("from"),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_settings(matches: &ArgMatches) -> anyhow::Result<Settings> {
    let path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG);
    Settings::new(path).with_context(|| format!("Failed to load configuration from {}", path))
}

fn parse_date(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<NaiveDate>> {
    matches
        .get_one::<String>(name)
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("--{} expects YYYY-MM-DD, got '{}'", name, s))
        })
        .transpose()
}

async fn run(matches: ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("historical", sub)) => {
            let settings = load_settings(sub)?;
            pipeline::run_pipeline(&settings, Mode::Historical, None)
                .await
                .context("Historical pipeline failed")?;
        }
        Some(("incremental", sub)) => {
            let settings = load_settings(sub)?;
            let hours = sub.get_one::<u32>("hours").copied();
            pipeline::run_pipeline(&settings, Mode::Incremental, hours)
                .await
                .context("Incremental pipeline failed")?;
        }
        Some(("load", sub)) => {
            let settings = load_settings(sub)?;
            let mode = match sub.get_one::<String>("mode").map(|s| s.as_str()) {
                Some("historical") => Mode::Historical,
                _ => Mode::Incremental,
            };
            let file = sub
                .get_one::<String>("file")
                .context("--file is required")?;
            let report = pipeline::load_staged(&settings, mode, Path::new(file))
                .await
                .with_context(|| format!("Failed to upload {}", file))?;
            info!(inserted = report.inserted, skipped = report.skipped, capped = report.capped, "Staged dataset uploaded");
        }
        Some(("summary", sub)) => {
            let settings = load_settings(sub)?;
            let (from, to) = match (parse_date(sub, "from")?, parse_date(sub, "to")?) {
                (Some(from), Some(to)) => (from, to),
                _ => {
                    let day = match parse_date(sub, "date")? {
                        Some(day) => day,
                        None => (Utc::now() - Duration::days(1)).date_naive(),
                    };
                    (day, day)
                }
            };
            let summary = pipeline::summarize(&settings, from, to)
                .await
                .context("Summary queries failed")?;
            println!("{}", serde_json::to_string_pretty(&summary.report())?);
        }
        _ => bail!("Please specify a valid subcommand. Use --help for usage information."),
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("json-logs"));

    if let Err(e) = run(matches).await {
        error!("{:#}", e);
        process::exit(1);
    }
}
