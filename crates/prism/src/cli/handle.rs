//! The `prism handle` command for processing object-created notifications.

use anyhow::Context;
use clap::{Args, ValueEnum};
use prism_core::output::OutputFormat as CoreOutputFormat;
use prism_core::retry::backoff_duration;
use prism_core::{
    parse_events, Config, DeadLetter, DeadLetterLog, Disposition, FsStore, InboundEvent,
    ObjectStore, OutputWriter, Prism, ProcessingOutcome, SourceLocation,
};
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments for the `handle` command.
#[derive(Args, Debug)]
pub struct HandleArgs {
    /// Notification document to process (`-` reads stdin)
    #[arg(required_unless_present = "source", conflicts_with = "source")]
    pub event: Option<PathBuf>,

    /// Process one object directly, given as `<container>/<key>`
    #[arg(long)]
    pub source: Option<String>,

    /// Root directory of the filesystem object store
    #[arg(long, env = "PRISM_STORE_ROOT")]
    pub store_root: Option<PathBuf>,

    /// Output file for outcomes (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Attempts per event; retryable failures are redelivered up to this many times
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Base delay between redeliveries in milliseconds (doubles each attempt)
    #[arg(long, default_value = "500")]
    pub retry_delay_ms: u64,

    /// Append events that were given up on to this JSONL file
    #[arg(long)]
    pub dead_letter: Option<PathBuf>,

    /// Skip label annotation
    #[arg(long)]
    pub no_labels: bool,
}

/// Supported output formats.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON object, or an array for multi-record notifications
    Json,
    /// One JSON object per line (newline-delimited)
    Jsonl,
}

impl From<OutputFormat> for CoreOutputFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => CoreOutputFormat::Json,
            OutputFormat::Jsonl => CoreOutputFormat::JsonLines,
        }
    }
}

/// Execute the handle command.
pub async fn execute(args: HandleArgs, mut config: Config) -> anyhow::Result<()> {
    if args.no_labels {
        config.labels.enabled = false;
    }

    let events = read_events(&args)?;
    tracing::info!("Handling {} event(s)", events.len());

    let root = args
        .store_root
        .clone()
        .unwrap_or_else(|| config.storage_root());
    tracing::debug!("Object store root: {}", root.display());
    let store: Arc<dyn ObjectStore> = Arc::new(FsStore::new(root));
    let prism = Prism::new(config, store.clone(), store)?;

    let dead_letters = args.dead_letter.as_ref().map(DeadLetterLog::new);
    let outcomes = handle_events(&prism, &events, &args, dead_letters.as_ref()).await?;

    write_outcomes(&outcomes, &args)?;

    let failed = outcomes
        .iter()
        .filter(|o| o.disposition != Disposition::Completed)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} event(s) failed", outcomes.len());
    }
    Ok(())
}

/// Process every event, redelivering retryable failures and recording the
/// ones given up on.
async fn handle_events(
    prism: &Prism,
    events: &[InboundEvent],
    args: &HandleArgs,
    dead_letters: Option<&DeadLetterLog>,
) -> anyhow::Result<Vec<ProcessingOutcome>> {
    let mut outcomes = Vec::with_capacity(events.len());

    for event in events {
        let (outcome, attempts) =
            run_with_redelivery(prism, event, args.max_attempts, args.retry_delay_ms).await;

        if outcome.disposition != Disposition::Completed {
            if let Some(log) = dead_letters {
                log.append(&DeadLetter::from_outcome(event, &outcome, attempts))
                    .with_context(|| format!("writing dead letter to {}", log.path().display()))?;
                tracing::warn!(
                    event_id = %event.event_id,
                    "Dead-lettered {} after {attempts} attempt(s)",
                    event.source
                );
            }
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// Process one event, redelivering while the outcome is retryable.
///
/// Returns the final outcome and the number of attempts it took.
async fn run_with_redelivery(
    prism: &Prism,
    event: &InboundEvent,
    max_attempts: u32,
    retry_delay_ms: u64,
) -> (ProcessingOutcome, u32) {
    let mut attempt = 1;
    loop {
        let outcome = prism.process(event).await;
        if !outcome.is_retryable() || attempt >= max_attempts {
            return (outcome, attempt);
        }

        let delay = backoff_duration(attempt - 1, retry_delay_ms);
        tracing::info!(
            event_id = %event.event_id,
            "Redelivering {} ({}/{}) in {delay:?}: {}",
            event.source,
            attempt + 1,
            max_attempts,
            outcome.reason()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

fn read_events(args: &HandleArgs) -> anyhow::Result<Vec<InboundEvent>> {
    if let Some(source) = &args.source {
        let location = parse_source(source)?;
        let event_id = uuid::Uuid::new_v4().to_string();
        return Ok(vec![InboundEvent::new(event_id, location)]);
    }

    let Some(path) = &args.event else {
        anyhow::bail!("Either an event document or --source is required");
    };

    let json = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading event document {}", path.display()))?
    };

    Ok(parse_events(&json)?)
}

fn parse_source(value: &str) -> anyhow::Result<SourceLocation> {
    match value.split_once('/') {
        Some((container, key)) if !container.is_empty() && !key.is_empty() => {
            Ok(SourceLocation::new(container, key))
        }
        _ => anyhow::bail!("--source must look like <container>/<key>, got {value:?}"),
    }
}

fn write_outcomes(outcomes: &[ProcessingOutcome], args: &HandleArgs) -> anyhow::Result<()> {
    let format = CoreOutputFormat::from(args.format);
    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            let mut writer = OutputWriter::new(BufWriter::new(file), format, true);
            writer.write_all(outcomes)?;
            writer.flush()?;
            tracing::info!("Wrote {} outcome(s) to {}", writer.items_written(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = OutputWriter::new(stdout.lock(), format, true);
            writer.write_all(outcomes)?;
            writer.flush()?;
        }
    }
    Ok(())
}
