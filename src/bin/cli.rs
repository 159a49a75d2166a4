//! Keiba CLI - decode feeds, recommend bets, settle days and run backtests

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use keiba::backtesting::{analyze_by_bet_type, analyze_by_venue, BacktestConfig, FundSimulator};
use keiba::core::{BankrollController, BankrollState, StakeDecision};
use keiba::data::{FeedDirectory, FeedSession, RawRecord, RecordSource};
use keiba::models::{venue_name, Bet};
use keiba::{DataSpec, EngineConfig, Estimator, RaceDayPipeline, RecordDecoder};

const DEFAULT_STATE_FILE: &str = "bankroll_state.json";

#[derive(Parser)]
#[command(name = "keiba")]
#[command(author, version, about = "JRA feed decoder and EV wagering engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (JSON)
    #[arg(long, env = "KEIBA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of `<feed id>_<YYYYMMDD>.txt` files
    #[arg(long, env = "FEED_DIR")]
    feed_dir: Option<PathBuf>,

    /// ONNX win model (needs the `onnx` feature)
    #[arg(long, env = "MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Base daily spending cap in yen
    #[arg(long, env = "DAILY_CAP")]
    daily_cap: Option<i64>,

    /// Base stake per bet in yen
    #[arg(long, env = "BASE_STAKE")]
    base_stake: Option<i64>,

    /// Persisted bankroll state
    #[arg(long, default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one feed file and print records as JSON lines
    Decode {
        /// Feed id or name (0B15 / CARD, 0B12 / RESULT, 0B30 / ODDS_WIN, 0B32 / ODDS_EXACTA)
        #[arg(short = 's', long)]
        data_spec: DataSpec,

        /// Race day (YYYYMMDD)
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,
    },

    /// Recommend bets for a race day
    Recommend {
        /// Race day (YYYYMMDD)
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,

        /// Days of history to read for lag features
        #[arg(long, default_value = "180")]
        history_days: i64,

        /// Write approved bets here (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Settle a day's bets against its payout records and update the bankroll
    Settle {
        /// Race day (YYYYMMDD)
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,

        /// Bets written by `recommend`
        #[arg(short, long)]
        bets: PathBuf,

        /// Refund bets whose race never got a payout record instead of
        /// leaving the day open
        #[arg(long)]
        void_unsettled: bool,
    },

    /// Replay a date range through the fund simulator
    Backtest {
        /// First simulated day (YYYYMMDD)
        #[arg(long, value_parser = parse_date)]
        from: NaiveDate,

        /// Last simulated day (YYYYMMDD)
        #[arg(long, value_parser = parse_date)]
        to: NaiveDate,

        /// Days of history before `from` to read for lag features
        #[arg(long, default_value = "180")]
        history_days: i64,

        /// Write the full result here (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .map_err(|_| format!("invalid date (expected YYYYMMDD): {}", s))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Decode { data_spec, date } => run_decode(&config, data_spec, date),
        Commands::Recommend {
            date,
            history_days,
            output,
        } => run_recommend(&config, &cli.state, date, history_days, output.as_deref()),
        Commands::Settle {
            date,
            bets,
            void_unsettled,
        } => run_settle(&config, &cli.state, date, &bets, void_unsettled),
        Commands::Backtest {
            from,
            to,
            history_days,
            output,
        } => run_backtest(&config, from, to, history_days, output.as_deref()),
    }
}

/// Config file, then flag/env overrides
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => EngineConfig::default(),
    };

    if let Some(cap) = cli.daily_cap {
        config.bankroll.base_daily_cap = cap;
    }
    if let Some(stake) = cli.base_stake {
        config.strategy.base_stake = stake;
    }
    if cli.model_path.is_some() {
        config.model_path = cli.model_path.clone();
    }
    if cli.feed_dir.is_some() {
        config.feed_dir = cli.feed_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn feed_dir(config: &EngineConfig) -> Result<&Path> {
    match &config.feed_dir {
        Some(dir) => Ok(dir),
        None => bail!("No feed directory given. Use --feed-dir or FEED_DIR."),
    }
}

fn build_estimator(config: &EngineConfig) -> Estimator {
    match &config.model_path {
        Some(path) => load_model(path),
        None => {
            info!("No model path given, using fallback estimator");
            Estimator::fallback_only()
        }
    }
}

#[cfg(feature = "onnx")]
fn load_model(path: &Path) -> Estimator {
    match keiba::predictor::OnnxWinModel::load(path) {
        Ok(model) => Estimator::with_model(model),
        Err(e) => {
            warn!("{}, using fallback estimator", e);
            Estimator::fallback_only()
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn load_model(path: &Path) -> Estimator {
    warn!(
        "Built without the onnx feature, ignoring model {:?} and using fallback estimator",
        path
    );
    Estimator::fallback_only()
}

fn load_controller(config: &EngineConfig, state_path: &Path) -> Result<BankrollController> {
    if !state_path.exists() {
        info!("No bankroll state at {:?}, starting fresh", state_path);
        return Ok(BankrollController::new(config.bankroll.clone()));
    }

    let contents = fs::read_to_string(state_path)
        .with_context(|| format!("Failed to read bankroll state {:?}", state_path))?;
    let state: BankrollState = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse bankroll state {:?}", state_path))?;
    Ok(BankrollController::from_state(config.bankroll.clone(), state))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb
}

fn fetch(session: &FeedSession) -> Result<Vec<RawRecord>> {
    let pb = spinner("Reading feed files...");
    let records = FeedDirectory
        .fetch(session)
        .with_context(|| "Failed to read feed")?;
    pb.finish_and_clear();
    Ok(records)
}

fn run_decode(config: &EngineConfig, data_spec: DataSpec, date: NaiveDate) -> Result<()> {
    let session = FeedSession::new(feed_dir(config)?, date, date).with_data_specs(&[data_spec]);
    let records = fetch(&session)?;

    let decoder = RecordDecoder::new();
    let mut decoded = 0usize;
    let mut rejected = 0usize;
    for record in &records {
        match decoder.decode_as(&record.bytes, record.data_spec) {
            Ok(typed) => {
                println!("{}", serde_json::to_string(&typed)?);
                decoded += 1;
            }
            Err(rejection) => {
                eprintln!("{}: {}", "Rejected".yellow(), rejection);
                rejected += 1;
            }
        }
    }

    eprintln!(
        "{}: {} decoded, {} rejected",
        data_spec.to_string().green(),
        decoded,
        rejected
    );
    Ok(())
}

fn run_recommend(
    config: &EngineConfig,
    state_path: &Path,
    date: NaiveDate,
    history_days: i64,
    output: Option<&Path>,
) -> Result<()> {
    println!("{}: {}", "Recommending".green(), date);

    let session = FeedSession::new(feed_dir(config)?, date - Duration::days(history_days), date);
    let records = fetch(&session)?;

    let mut pipeline = RaceDayPipeline::new(build_estimator(config), config.strategy.clone());
    let stats = pipeline.ingest(&records);
    println!(
        "Ingested {} records ({} rejected), estimator: {}",
        stats.decoded,
        stats.total_rejected(),
        pipeline.estimator().model_name()
    );

    let controller = load_controller(config, state_path)?;
    let plan = pipeline.plan_day(date, &controller)?;

    println!(
        "Mode: {}  Cap: {}  Balance: {}",
        controller.state().mode,
        plan.book.daily_cap,
        controller.state().balance
    );
    println!();

    if plan.decisions.is_empty() {
        println!("{}", "No bets for this day.".yellow());
    } else {
        println!(
            "{:<18} {:<6} {:<6} {:>6} {:>8}  {}",
            "Race", "Venue", "Type", "Pick", "Stake", "Rationale"
        );
        println!("{}", "-".repeat(90));
        for decision in &plan.decisions {
            print_decision(decision);
        }
        println!("{}", "-".repeat(90));
        println!(
            "{} bets, {} of {} yen",
            plan.approved_bets().len(),
            plan.book.spent(),
            plan.book.daily_cap
        );
    }

    if let Some(path) = output {
        write_json(path, &plan.approved_bets())?;
        println!("{}: {:?}", "Saved".green(), path);
    }
    Ok(())
}

fn print_decision(decision: &StakeDecision) {
    let (bet, note) = match decision {
        StakeDecision::Approved(bet) => (bet, String::new()),
        StakeDecision::Resized { bet, requested } => {
            (bet, format!(" (resized from {})", requested).yellow().to_string())
        }
        StakeDecision::Rejected { bet, reason } => {
            (bet, format!(" (rejected: {:?})", reason).red().to_string())
        }
    };
    let line = format!(
        "{:<18} {:<6} {:<6} {:>6} {:>8}  {}{}",
        bet.race_id.key(),
        venue_name(bet.race_id.venue_code),
        bet.bet_type.to_string(),
        bet.selection.to_string(),
        bet.stake_amount,
        bet.rationale_tag,
        note
    );
    match decision {
        StakeDecision::Rejected { .. } => println!("{}", line.dimmed()),
        _ => println!("{}", line),
    }
}

fn run_settle(
    config: &EngineConfig,
    state_path: &Path,
    date: NaiveDate,
    bets_path: &Path,
    void_unsettled: bool,
) -> Result<()> {
    println!("{}: {}", "Settling".green(), date);

    let contents = fs::read_to_string(bets_path)
        .with_context(|| format!("Failed to read bets {:?}", bets_path))?;
    let bets: Vec<Bet> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse bets {:?}", bets_path))?;
    if let Some(foreign) = bets.iter().find(|b| b.race_id.date != date) {
        bail!("Bet for race {} is not on {}", foreign.race_id, date);
    }

    let session = FeedSession::new(feed_dir(config)?, date, date).with_data_specs(&[DataSpec::Result]);
    let records = fetch(&session)?;

    let mut pipeline = RaceDayPipeline::new(Estimator::fallback_only(), config.strategy.clone());
    pipeline.ingest(&records);

    let mut controller = load_controller(config, state_path)?;
    let mut book = controller.open_day(date)?;
    for bet in &bets {
        if book.approve(bet).approved_bet().is_none() {
            warn!("{} {} no longer fits the day's cap", bet.race_id, bet.selection);
        }
    }

    let settled = if void_unsettled {
        pipeline.settle_day_voiding_unsettled(book, &mut controller)?
    } else {
        pipeline
            .settle_day(book, &mut controller)
            .context("Day left open; retry once payouts are published or pass --void-unsettled")?
    };
    for s in &settled.bets {
        let status = if s.is_hit() {
            format!("+{}", s.returned).green()
        } else if s.settlement == keiba::core::Settlement::Unsettled {
            "unsettled".yellow()
        } else {
            "miss".red()
        };
        println!(
            "{:<18} {:<6} {:>6} {:>8}  {}",
            s.bet.race_id.key(),
            s.bet.bet_type.to_string(),
            s.bet.selection.to_string(),
            s.bet.stake_amount,
            status
        );
    }

    let summary = &settled.summary;
    let pnl = format!("{:+}", summary.pnl);
    println!("{}", "-".repeat(50));
    println!(
        "Staked {}  Returned {}  P&L {}",
        summary.staked,
        summary.returned,
        if summary.pnl >= 0 { pnl.green() } else { pnl.red() }
    );
    println!(
        "Balance {}  Mode {} -> {}  Next cap {}",
        summary.balance, summary.mode_before, summary.mode_after, summary.next_cap
    );

    write_json(state_path, controller.state())?;
    println!("{}: {:?}", "Saved".green(), state_path);
    Ok(())
}

fn run_backtest(
    config: &EngineConfig,
    from: NaiveDate,
    to: NaiveDate,
    history_days: i64,
    output: Option<&Path>,
) -> Result<()> {
    if to < from {
        bail!("--to {} is before --from {}", to, from);
    }
    println!("{}: {} ..= {}", "Running backtest".green(), from, to);

    let session = FeedSession::new(feed_dir(config)?, from - Duration::days(history_days), to);
    let records = fetch(&session)?;

    let pipeline = RaceDayPipeline::new(build_estimator(config), config.strategy.clone());
    let controller = BankrollController::new(config.bankroll.clone());
    let mut simulator = FundSimulator::new(
        BacktestConfig {
            start_date: Some(from),
            end_date: Some(to),
        },
        pipeline,
        controller,
    );

    let pb = spinner("Ingesting records...");
    simulator.load(&records);
    pb.finish_and_clear();

    let days = simulator.race_days();
    let pb = ProgressBar::new(days.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let result = simulator.run_with_progress(|day| {
        pb.set_message(format!("{} {:+}", day.date, day.pnl));
        pb.inc(1);
    })?;
    pb.finish_and_clear();

    let m = &result.metrics;
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("Records decoded: {} ({} rejected)", result.ingest.decoded, result.ingest.rejected);
    println!("Race days: {} ({} throttled)", m.days, m.days_throttled);
    println!("Total bets: {} ({} unsettled)", m.total_bets, m.unsettled_bets);
    println!("Winning bets: {}", m.winning_bets);
    println!("{}", "-".repeat(60));
    println!("Total stake: {}", m.total_stake);
    println!("Total returned: {}", m.total_returned);
    let net = format!("{:+}", m.net_profit);
    println!(
        "Net profit: {}",
        if m.net_profit >= 0 { net.green() } else { net.red() }
    );
    println!("ROI: {:.1}%", m.roi * 100.0);
    println!("Hit rate: {:.1}%", m.hit_rate * 100.0);
    println!("Profit factor: {:.2}", m.profit_factor);
    println!("Max drawdown: {} ({:.1}%)", m.max_drawdown, m.max_drawdown_pct * 100.0);
    println!("Final balance: {}  Final cap: {}", m.final_balance, m.final_cap);
    println!("{}", "=".repeat(60));

    if !result.bets.is_empty() {
        for (title, analysis) in [
            ("Analysis by Venue:", analyze_by_venue(&result.bets)),
            ("Analysis by Bet Type:", analyze_by_bet_type(&result.bets)),
        ] {
            println!("\n{}", title.yellow().bold());
            println!(
                "{:>8} {:>8} {:>8} {:>10} {:>12} {:>10}",
                "Key", "Bets", "Wins", "Hit Rate", "Profit", "ROI"
            );
            println!("{}", "-".repeat(60));
            for a in &analysis {
                println!(
                    "{:>8} {:>8} {:>8} {:>9.1}% {:>12} {:>9.1}%",
                    a.key,
                    a.bets,
                    a.wins,
                    a.hit_rate * 100.0,
                    a.profit,
                    a.roi * 100.0
                );
            }
        }
    }

    if let Some(path) = output {
        write_json(path, &result)?;
        println!("\n{}: {:?}", "Saved".green(), path);
    }
    Ok(())
}
