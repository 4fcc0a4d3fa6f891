use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

use wavekit::{
    BarSource, Candle, CandleSeries, HarmonicConfig, HarmonicProjectionEngine, ImpulseConfig,
    SetupConfig, SetupStateMachine, TimeframeId, TriangleConfig, TriangleSetupMachine,
};

/// Scan a candle CSV for trade setups and print signals as JSON lines.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Candle CSV with `time,open,high,low,close` columns. Time is an
    /// RFC 3339 timestamp or a unix epoch in seconds.
    input: PathBuf,

    /// Timeframe of the input candles
    #[arg(short, long, default_value = "m1")]
    timeframe: String,

    /// Also run the harmonic (Gartley-family) projection engine
    #[arg(long)]
    harmonics: bool,

    /// Also run the contracting-triangle machine
    #[arg(long)]
    triangles: bool,

    /// Retracement ratio of the impulse leg that triggers an entry
    #[arg(long)]
    trigger_ratio: Option<f64>,

    /// Take-profit size as a ratio of the impulse leg
    #[arg(long)]
    take_ratio: Option<f64>,

    /// Require candle-level smoothness on the driving leg
    #[arg(long)]
    smooth: bool,
}

#[derive(Debug, Deserialize)]
struct CsvCandle {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

fn parse_timeframe(value: &str) -> Result<TimeframeId> {
    let timeframe = match value.to_ascii_lowercase().as_str() {
        "m1" => TimeframeId::M1,
        "m5" => TimeframeId::M5,
        "m15" => TimeframeId::M15,
        "m30" => TimeframeId::M30,
        "h1" => TimeframeId::H1,
        "h4" => TimeframeId::H4,
        "d1" => TimeframeId::D1,
        other => bail!("unknown timeframe {other:?}"),
    };
    Ok(timeframe)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(epoch) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(epoch, 0)
            .single()
            .with_context(|| format!("epoch {epoch} out of range"));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("bad timestamp {raw:?}"))
}

fn load_candles(path: &PathBuf, timeframe: TimeframeId) -> Result<CandleSeries> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;

    let mut candles = Vec::new();
    for record in reader.deserialize() {
        let row: CsvCandle = record.context("bad candle row")?;
        let open_time = parse_time(&row.time)?;
        candles.push(Candle::new(row.open, row.high, row.low, row.close, open_time));
    }
    if candles.is_empty() {
        bail!("{} contains no candles", path.display());
    }

    Ok(CandleSeries::from_candles(timeframe, candles))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wavekit=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let timeframe = parse_timeframe(&args.timeframe)?;
    let series = load_candles(&args.input, timeframe)?;
    info!(
        candles = series.count(),
        %timeframe,
        "loaded {}",
        args.input.display()
    );

    let mut setup_config = SetupConfig::default();
    if let Some(ratio) = args.trigger_ratio {
        setup_config.trigger_ratio = ratio;
    }
    if let Some(ratio) = args.take_ratio {
        setup_config.take_ratio = ratio;
    }
    setup_config.require_smooth = args.smooth;

    let mut machine = SetupStateMachine::new(setup_config, ImpulseConfig::default());
    let mut triangles = args
        .triangles
        .then(|| TriangleSetupMachine::new(TriangleConfig::default()));
    let mut harmonics = args
        .harmonics
        .then(|| HarmonicProjectionEngine::new(&HarmonicConfig::default()));

    let mut signal_count = 0usize;
    let mut pattern_count = 0usize;
    let stdout = std::io::stdout();

    for index in 0..series.count() {
        machine.calculate(&series, index);
        for event in machine.drain_events() {
            signal_count += 1;
            serde_json::to_writer(stdout.lock(), &event)?;
            println!();
        }

        if let Some(triangles) = triangles.as_mut() {
            triangles.calculate(&series, index);
            for event in triangles.drain_events() {
                signal_count += 1;
                serde_json::to_writer(stdout.lock(), &event)?;
                println!();
            }
        }

        if let Some(engine) = harmonics.as_mut() {
            for pattern in engine.find_patterns(&series, index) {
                pattern_count += 1;
                debug!(kind = %pattern.kind, accuracy = pattern.accuracy_percent, "pattern");
                serde_json::to_writer(stdout.lock(), &pattern)?;
                println!();
            }
        }
    }

    info!(signals = signal_count, patterns = pattern_count, "scan complete");
    Ok(())
}
