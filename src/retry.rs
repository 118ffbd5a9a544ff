//! The captcha loop: acquire, transcribe, clean, submit, check, and on any
//! failure refresh the captcha and go again until the attempt ceiling.
//!
//! Every attempt produces a single [`AttemptOutcome`]. [`CaptchaLoop::apply`]
//! is the only place counters change and the only place that decides whether
//! to stop, refresh, or pause.

use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::captcha::{acquire_captcha, save_snapshot, AcquireError};
use crate::config::BookingConfig;
use crate::openai_client::{TranscribeError, Transcriber};
use crate::page::{selectors, PageAutomation};
use crate::sanitize::{validate, ValidationError};

/// Counters for one booking run. They only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopState {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
}

#[derive(Debug, Error)]
pub enum FailureReason {
    #[error("could not read captcha: {0}")]
    Acquisition(#[from] AcquireError),
    #[error("no transcription API key configured")]
    MissingCredential,
    #[error("transcription gave no result: {0}")]
    Transcription(#[from] TranscribeError),
    #[error("transcribed text unusable: {0}")]
    Validation(#[from] ValidationError),
    #[error("booking not confirmed by the page")]
    Rejected,
    #[error("attempt failed: {0:#}")]
    Unexpected(anyhow::Error),
}

impl From<anyhow::Error> for FailureReason {
    fn from(e: anyhow::Error) -> Self {
        FailureReason::Unexpected(e)
    }
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Success,
    Retry(FailureReason),
}

impl From<Result<(), FailureReason>> for AttemptOutcome {
    fn from(r: Result<(), FailureReason>) -> Self {
        match r {
            Ok(()) => AttemptOutcome::Success,
            Err(reason) => AttemptOutcome::Retry(reason),
        }
    }
}

/// What the loop does after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Stop,
    Continue { refresh: bool, pause: bool },
}

/// Which failures ask the page for a new captcha.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshPolicy {
    /// A transcription failure keeps the current captcha unless this is set.
    pub on_transcription_failure: bool,
}

impl RefreshPolicy {
    pub fn refreshes(&self, reason: &FailureReason) -> bool {
        match reason {
            FailureReason::Acquisition(_)
            | FailureReason::Validation(_)
            | FailureReason::Rejected => true,
            FailureReason::Transcription(_) => self.on_transcription_failure,
            FailureReason::MissingCredential | FailureReason::Unexpected(_) => false,
        }
    }

    /// Validation and rejection wait through the refresh settle instead.
    fn pauses(&self, reason: &FailureReason) -> bool {
        !matches!(reason, FailureReason::Validation(_) | FailureReason::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Booked { attempt: u32 },
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub state: LoopState,
}

pub struct CaptchaLoop<'a, P, T> {
    page: &'a P,
    transcriber: &'a T,
    cfg: &'a BookingConfig,
    policy: RefreshPolicy,
    state: LoopState,
}

impl<'a, P, T> CaptchaLoop<'a, P, T>
where
    P: PageAutomation,
    T: Transcriber,
{
    pub fn new(page: &'a P, transcriber: &'a T, cfg: &'a BookingConfig) -> Self {
        Self {
            page,
            transcriber,
            cfg,
            policy: RefreshPolicy {
                on_transcription_failure: cfg.refresh_on_transcription_failure,
            },
            state: LoopState::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub async fn run(&mut self) -> RunReport {
        let max = self.cfg.max_attempts;
        if self.transcriber.is_configured() {
            info!("transcription API key loaded");
        } else {
            warn!("transcription API key missing; every attempt will fail without calling the service");
        }

        while self.state.attempts < max {
            self.state.attempts += 1;
            let attempt = self.state.attempts;
            info!(attempt, max, "captcha attempt");
            sleep(self.cfg.timings.attempt_delay).await;

            let outcome = AttemptOutcome::from(self.attempt(attempt).await);
            match self.apply(outcome) {
                Control::Stop => {
                    return self.report(RunOutcome::Booked { attempt });
                }
                Control::Continue { refresh, pause } => {
                    if refresh {
                        self.refresh_captcha().await;
                    }
                    if pause {
                        sleep(self.cfg.timings.retry_pause).await;
                    }
                }
            }
        }

        warn!(max, "attempt ceiling reached without a confirmed booking");
        self.report(RunOutcome::Exhausted)
    }

    /// Fold one outcome into the counters and pick the next move.
    pub fn apply(&mut self, outcome: AttemptOutcome) -> Control {
        let attempt = self.state.attempts;
        match outcome {
            AttemptOutcome::Success => {
                self.state.successes += 1;
                info!(attempt, "booking confirmed");
                Control::Stop
            }
            AttemptOutcome::Retry(reason) => {
                self.state.failures += 1;
                match &reason {
                    FailureReason::Unexpected(e) => {
                        error!(attempt, failures = self.state.failures, "attempt error: {e:?}")
                    }
                    other => warn!(attempt, failures = self.state.failures, "{other}"),
                }
                let last = attempt >= self.cfg.max_attempts;
                Control::Continue {
                    refresh: self.policy.refreshes(&reason),
                    pause: !last && self.policy.pauses(&reason),
                }
            }
        }
    }

    async fn attempt(&self, attempt: u32) -> Result<(), FailureReason> {
        let timings = &self.cfg.timings;

        let image = acquire_captcha(self.page, timings).await?;

        if let Some(dir) = &self.cfg.debug_dir {
            if let Err(e) = save_snapshot(dir, attempt, &image) {
                warn!("could not save captcha snapshot: {e:#}");
            }
        }

        if !self.transcriber.is_configured() {
            return Err(FailureReason::MissingCredential);
        }

        let raw = self.transcriber.transcribe(&image).await?;
        let text = validate(&raw, self.cfg.min_captcha_len)?;
        info!(raw = %raw, cleaned = %text, "captcha transcribed");

        let input = self
            .page
            .wait_for_present(&selectors::captcha_input(), timings.long_timeout)
            .await?;
        self.page.clear(&input).await?;
        self.page.type_text(&input, &text).await?;

        let submit = self
            .page
            .wait_for_clickable(&selectors::submit_button(), timings.long_timeout)
            .await?;
        self.page.click(&submit).await?;
        sleep(timings.submit_settle).await;

        let source = self.page.page_source().await?;
        if self.cfg.success_markers.iter().any(|m| source.contains(m.as_str())) {
            Ok(())
        } else {
            Err(FailureReason::Rejected)
        }
    }

    /// Best effort: ask the page for a new captcha image.
    async fn refresh_captcha(&self) {
        let timings = &self.cfg.timings;
        let clicked: anyhow::Result<()> = async {
            let button = self
                .page
                .wait_for_clickable(&selectors::refresh_button(), timings.long_timeout)
                .await?;
            self.page.click(&button).await
        }
        .await;

        match clicked {
            Ok(()) => {
                info!("requested a new captcha");
                sleep(timings.refresh_settle).await;
            }
            Err(e) => warn!("captcha refresh failed: {e:#}"),
        }
    }

    fn report(&self, outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            state: self.state,
        }
    }
}
