use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use court_booker::booking;
use court_booker::config::BookingConfig;
use court_booker::driver::Session;
use court_booker::openai_client::{OpenAiTranscriber, TranscriptionConfig};
use court_booker::page::WebDriverPage;
use court_booker::retry::{CaptchaLoop, RunOutcome};

/// Book a sports-centre court slot, solving the captcha with a vision model.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Booking date, YYYY/MM/DD (overrides BOOKING_DATE)
    #[arg(long)]
    date: Option<String>,

    /// Court option value, e.g. VOL0A (overrides BOOKING_COURT)
    #[arg(long)]
    court: Option<String>,

    /// Time slot label, e.g. 06~08 (overrides BOOKING_SLOT)
    #[arg(long)]
    slot: Option<String>,

    /// Captcha attempt ceiling (overrides MAX_ATTEMPTS)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Close the browser when the run ends
    #[arg(long)]
    close_browser: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_config(cli: Cli) -> BookingConfig {
    let mut cfg = BookingConfig::from_env();
    if let Some(date) = cli.date {
        cfg.target_date = date;
    }
    if let Some(court) = cli.court {
        cfg.court = court;
    }
    if let Some(slot) = cli.slot {
        cfg.time_slot = slot;
    }
    if let Some(max) = cli.max_attempts {
        cfg.max_attempts = max;
    }
    if cli.close_browser {
        cfg.keep_browser_open = false;
    }
    cfg
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cfg = build_config(Cli::parse());
    let transcriber = OpenAiTranscriber::new(TranscriptionConfig::from_env())
        .context("build transcription client")?;
    info!(
        date = %cfg.target_date,
        court = %cfg.court,
        slot = %cfg.time_slot,
        model = transcriber.model(),
        "starting booking run"
    );

    let session = Session::start().await?;
    let page = WebDriverPage::new(session.driver.clone());

    match booking::prepare(&page, &cfg).await {
        Ok(()) => {
            let report = CaptchaLoop::new(&page, &transcriber, &cfg).run().await;
            match report.outcome {
                RunOutcome::Booked { attempt } => info!(attempt, "🎉 reservation submitted"),
                RunOutcome::Exhausted => error!("gave up after {} attempts", report.state.attempts),
            }
            info!(
                successes = report.state.successes,
                failures = report.state.failures,
                "captcha handling finished"
            );
        }
        Err(e) => error!("booking aborted before captcha: {e:?}"),
    }

    session.finish(cfg.keep_browser_open).await;
    Ok(())
}
