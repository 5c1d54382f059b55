//! ashare-data - fetch, validate and export A-share market data.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ashare_common::config::{config_path, Config, PartialFailurePolicy};
use ashare_common::logging::init_logging;
use ashare_common::ResultExt;
use ashare_data::analytics::{
    bar_series, board_distribution, category_counts, normalized_closes, summarize,
};
use ashare_data::data::{market_today, DateRange, RequestRange};
use ashare_data::{
    CsvExporter, DataKind, DataRequest, FetchError, FetchOptions, FetchOutcome, MarketDataClient,
    NormalizedRecord,
};

#[derive(Parser, Debug)]
#[command(name = "ashare-data")]
#[command(version)]
#[command(about = "Fetch, validate and export A-share market data.", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.ashare/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one identifier
    Fetch {
        /// index-bar, tick, financial-indicator or announcement
        #[arg(short, long)]
        kind: DataKind,

        /// Code such as 000001, 000001.SH or sh000001
        #[arg(short, long)]
        symbol: String,

        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Fetch several identifiers of one kind in a single run
    Batch {
        #[arg(short, long)]
        kind: DataKind,

        /// Comma-separated codes
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Validate configuration and list enabled providers
    CheckConfig,
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// First day (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last day (YYYY-MM-DD), defaults to today
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,

    /// Latest N rows instead of a date range
    #[arg(long, conflicts_with_all = ["start", "end"])]
    latest: Option<usize>,

    /// fail-fast or best-effort
    #[arg(long)]
    policy: Option<PartialFailurePolicy>,
}

impl RangeArgs {
    fn range(&self) -> Result<RequestRange> {
        match (self.latest, self.start) {
            (Some(n), _) => Ok(RequestRange::Latest(n)),
            (None, Some(start)) => {
                let end = self.end.unwrap_or_else(market_today);
                Ok(RequestRange::Between(DateRange::new(start, end)?))
            }
            (None, None) => Ok(RequestRange::Latest(30)),
        }
    }
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Write accepted records to CSV
    #[arg(long)]
    export: bool,

    /// CSV directory (overrides export.output_dir)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// List every rejected row
    #[arg(long)]
    show_rejected: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load_with_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if err
                .downcast_ref::<ashare_common::Error>()
                .is_some_and(ashare_common::Error::is_config)
            {
                eprintln!("Hint: run `ashare-data check-config` to inspect the configuration");
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Map a failure to the process exit code: 2 for bad configuration or
/// input, 3 for IO, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    let code = if let Some(e) = err.downcast_ref::<ashare_common::Error>() {
        e.exit_code()
    } else if let Some(FetchError::InvalidRequest(_)) = err.downcast_ref::<FetchError>() {
        2
    } else {
        1
    };
    u8::try_from(code).unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::InitConfig { force } = cli.command {
        let path = cli.config.unwrap_or_else(config_path);
        return init_config(&path, force);
    }

    let config = load_config(cli.config.as_ref())?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.observability.log_level.as_str()
    };
    init_logging(level, &config.observability.log_format);

    match cli.command {
        Commands::CheckConfig => check_config(&config, cli.config.as_ref()),
        Commands::InitConfig { .. } => Ok(()),
        Commands::Fetch {
            kind,
            symbol,
            range,
            output,
        } => {
            let client = build_client(&config, range.policy)?;
            let request = DataRequest::new(kind, symbol, range.range()?)?;
            let outcome = client.fetch(&request).await?;
            report(&config, &outcome, &output)
        }
        Commands::Batch {
            kind,
            symbols,
            range,
            output,
        } => {
            let client = build_client(&config, range.policy)?;
            let range = range.range()?;
            if kind != DataKind::IndexBar {
                print_boards(&symbols);
            }
            let requests = symbols
                .into_iter()
                .map(|s| DataRequest::new(kind, s, range))
                .collect::<Result<Vec<_>, _>>()?;
            let outcome = client.fetch_batch(&requests).await?;
            report(&config, &outcome, &output)
        }
    }
}

/// Write the default configuration to `path`. An existing file is kept
/// unless `force` is set.
fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(ashare_common::Error::Config(format!(
            "{} already exists, pass --force to overwrite",
            path.display()
        ))
        .into());
    }

    Config::default().save_to(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn build_client(
    config: &Config,
    policy: Option<PartialFailurePolicy>,
) -> Result<MarketDataClient> {
    config.ensure_valid().context("Invalid configuration")?;

    let client = MarketDataClient::from_config(config)?;
    Ok(match policy {
        Some(policy) => {
            let options = FetchOptions::from(&config.data).with_policy(policy);
            client.with_options(options)
        }
        None => client,
    })
}

fn check_config(config: &Config, path: Option<&PathBuf>) -> Result<()> {
    let path = path.cloned().unwrap_or_else(config_path);
    println!("Config: {}", path.display());

    config.ensure_valid()?;

    println!(
        "Fetch: retries={} backoff={}ms timeout={}s policy={} cache={} concurrency={}",
        config.data.max_retries,
        config.data.retry_backoff_ms,
        config.data.timeout_per_call_secs,
        config.data.on_partial_failure,
        config.data.cache_capacity,
        config.data.concurrency,
    );

    let router = MarketDataClient::router_from_config(config);
    for info in router.adapters_info() {
        let kinds: Vec<&str> = info.kinds.iter().map(DataKind::as_str).collect();
        println!(
            "Provider: {} (priority {}) serves {}",
            info.name,
            info.priority,
            kinds.join(", ")
        );
    }

    println!("Configuration OK");
    Ok(())
}

fn report(config: &Config, outcome: &FetchOutcome, output: &OutputArgs) -> Result<()> {
    let report = &outcome.report;
    println!(
        "Legs: {}  Accepted: {}  Rejected: {}  Retries: {}{}",
        outcome.legs,
        report.accepted.len(),
        report.rejected.len(),
        outcome.retries,
        if outcome.from_cache { "  (cached)" } else { "" },
    );

    for (reason, count) in report.rejection_counts() {
        println!("  rejected {reason}: {count}");
    }
    if output.show_rejected {
        for rejection in &report.rejected {
            println!(
                "  row {}: {} {}",
                rejection.row_index, rejection.reason, rejection.detail
            );
        }
    }
    for failure in &outcome.failures {
        println!("  FAILED {failure}");
    }

    print_analytics(&report.accepted);

    if output.export && !report.accepted.is_empty() {
        let exporter = match &output.output_dir {
            Some(dir) => CsvExporter::new(dir),
            None => CsvExporter::from_config(&config.export),
        };
        for path in exporter.export(&report.accepted)? {
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn print_analytics(records: &[NormalizedRecord]) {
    for summary in summarize(records) {
        println!(
            "{}: {} bars {}..{} close {:.2} return {:.2}% volatility {}",
            summary.symbol,
            summary.bars,
            summary.first_date,
            summary.last_date,
            summary.last_close,
            summary.cumulative_return_pct,
            summary
                .annualized_volatility_pct
                .map(|v| format!("{v:.2}%"))
                .unwrap_or_else(|| "n/a".into()),
        );
    }

    let series = bar_series(records);
    if series.len() > 1 {
        println!("Rebased to 100:");
        for (symbol, bars) in &series {
            let rebased = normalized_closes(bars);
            let low = rebased.iter().map(|(_, v)| *v).fold(f64::MAX, f64::min);
            let high = rebased.iter().map(|(_, v)| *v).fold(f64::MIN, f64::max);
            if let Some((date, last)) = rebased.last() {
                println!("  {symbol}: {last:.2} on {date} (range {low:.2}..{high:.2})");
            }
        }
    }

    let announcements: Vec<_> = records
        .iter()
        .filter_map(NormalizedRecord::as_announcement)
        .cloned()
        .collect();
    if !announcements.is_empty() {
        for (category, count) in category_counts(&announcements) {
            println!("  {category}: {count}");
        }
    }
}

fn print_boards(symbols: &[String]) {
    let distribution = board_distribution(symbols.iter().map(String::as_str));
    for (board, count) in &distribution.counts {
        println!("Board {board}: {count} ({:.1}%)", distribution.share(*board));
    }
    if distribution.unclassified > 0 {
        println!("Board unknown: {}", distribution.unclassified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "ashare-data",
            "fetch",
            "--kind",
            "index-bar",
            "--symbol",
            "000001",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-31",
            "--policy",
            "fail-fast",
        ])
        .unwrap();

        match cli.command {
            Commands::Fetch { kind, range, .. } => {
                assert_eq!(kind, DataKind::IndexBar);
                assert_eq!(range.policy, Some(PartialFailurePolicy::FailFast));
                assert_eq!(range.range().unwrap().to_string(), "2024-01-01..=2024-01-31");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_latest_conflicts_with_range() {
        let result = Cli::try_parse_from([
            "ashare-data",
            "fetch",
            "-k",
            "tick",
            "-s",
            "600519",
            "--latest",
            "100",
            "--start",
            "2024-01-01",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parses_init_config() {
        let cli = Cli::try_parse_from([
            "ashare-data",
            "--config",
            "/tmp/a.json",
            "init-config",
            "--force",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::InitConfig { force: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.json")));
    }

    #[test]
    fn test_init_config_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        init_config(&path, false).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());

        let err = init_config(&path, false).unwrap_err();
        assert_eq!(exit_code(&err), 2);
        assert!(init_config(&path, true).is_ok());
    }

    #[test]
    fn test_exit_codes() {
        let invalid = Config {
            data: ashare_common::DataConfig {
                concurrency: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = build_client(&invalid, None).err().unwrap();
        assert_eq!(exit_code(&err), 2);

        let missing = load_config(Some(&PathBuf::from("/nonexistent/ashare/config.json")))
            .unwrap_err();
        assert_eq!(exit_code(&missing), 3);

        let bad_request: anyhow::Error = FetchError::InvalidRequest("empty".into()).into();
        assert_eq!(exit_code(&bad_request), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn test_cli_batch_symbols() {
        let cli = Cli::try_parse_from([
            "ashare-data",
            "batch",
            "-k",
            "announcement",
            "-s",
            "600519,000001",
        ])
        .unwrap();

        match cli.command {
            Commands::Batch { symbols, range, .. } => {
                assert_eq!(symbols, vec!["600519", "000001"]);
                assert_eq!(range.range().unwrap(), RequestRange::Latest(30));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
