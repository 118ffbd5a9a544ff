#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use court_booker::config::{BookingConfig, Timings};
use court_booker::openai_client::{TranscribeError, Transcriber};
use court_booker::page::{selectors, Locator, PageAutomation};

pub const PNG_URI: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// What the captcha image looks like on one read.
#[derive(Debug, Clone)]
pub enum Captcha {
    Missing,
    NoSrc,
    Src(String),
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub locator: Locator,
    src: Option<String>,
}

/// Scripted stand-in for the browser. Every interaction is appended to `log`.
pub struct ScriptedPage {
    captchas: Mutex<VecDeque<Captcha>>,
    verdicts: Mutex<VecDeque<String>>,
    source: Mutex<String>,
    pub log: Mutex<Vec<String>>,
    pub missing: Mutex<Vec<Locator>>,
}

impl ScriptedPage {
    /// `captchas` are served one per read; once drained the image is missing.
    /// `verdicts` become the page source after each submit click.
    pub fn new(captchas: Vec<Captcha>, verdicts: Vec<&str>) -> Self {
        Self {
            captchas: Mutex::new(captchas.into()),
            verdicts: Mutex::new(verdicts.into_iter().map(String::from).collect()),
            source: Mutex::new("<html>預約</html>".to_string()),
            log: Mutex::new(Vec::new()),
            missing: Mutex::new(Vec::new()),
        }
    }

    pub fn without(self, locator: Locator) -> Self {
        self.missing.lock().unwrap().push(locator);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| e.as_str() == entry).count()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn lookup(&self, locator: &Locator) -> Result<FakeElement> {
        if self.missing.lock().unwrap().contains(locator) {
            return Err(anyhow!("timed out waiting for {locator}"));
        }
        if *locator == selectors::captcha_image() {
            self.record("acquire".into());
            let next = self.captchas.lock().unwrap().pop_front().unwrap_or(Captcha::Missing);
            return match next {
                Captcha::Missing => Err(anyhow!("timed out waiting for {locator}")),
                Captcha::NoSrc => Ok(FakeElement { locator: locator.clone(), src: None }),
                Captcha::Src(s) => Ok(FakeElement { locator: locator.clone(), src: Some(s) }),
            };
        }
        Ok(FakeElement { locator: locator.clone(), src: None })
    }
}

#[async_trait]
impl PageAutomation for ScriptedPage {
    type Element = FakeElement;

    async fn goto(&self, url: &str) -> Result<()> {
        self.record(format!("goto:{url}"));
        Ok(())
    }

    async fn find_element(&self, locator: &Locator) -> Result<FakeElement> {
        self.lookup(locator)
    }

    async fn wait_for_present(&self, locator: &Locator, _timeout: Duration) -> Result<FakeElement> {
        self.lookup(locator)
    }

    async fn wait_for_clickable(&self, locator: &Locator, _timeout: Duration) -> Result<FakeElement> {
        self.lookup(locator)
    }

    async fn read_attribute(&self, element: &FakeElement, name: &str) -> Result<Option<String>> {
        Ok(if name == "src" { element.src.clone() } else { None })
    }

    async fn clear(&self, element: &FakeElement) -> Result<()> {
        self.record(format!("clear:{}", element.locator));
        Ok(())
    }

    async fn type_text(&self, element: &FakeElement, text: &str) -> Result<()> {
        self.record(format!("type:{}={text}", element.locator));
        Ok(())
    }

    async fn click(&self, element: &FakeElement) -> Result<()> {
        if element.locator == selectors::refresh_button() {
            self.record("refresh".into());
        } else if element.locator == selectors::submit_button() {
            self.record("submit".into());
            let verdict = self
                .verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "<html>驗證碼錯誤</html>".to_string());
            *self.source.lock().unwrap() = verdict;
        } else {
            self.record(format!("click:{}", element.locator));
        }
        Ok(())
    }

    async fn js_click(&self, element: &FakeElement) -> Result<()> {
        self.record(format!("js_click:{}", element.locator));
        Ok(())
    }

    async fn scroll_into_view(&self, element: &FakeElement) -> Result<()> {
        self.record(format!("scroll:{}", element.locator));
        Ok(())
    }

    async fn select_by_value(&self, element: &FakeElement, value: &str) -> Result<()> {
        self.record(format!("select:{}={value}", element.locator));
        Ok(())
    }

    async fn execute_script(&self, code: &str) -> Result<Value> {
        self.record(format!("script:{code}"));
        Ok(Value::Null)
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.source.lock().unwrap().clone())
    }
}

/// Transcriber that replays canned replies and counts calls.
pub struct ScriptedTranscriber {
    configured: bool,
    replies: Mutex<VecDeque<Result<String, TranscribeError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn replying(replies: Vec<Result<String, TranscribeError>>) -> Self {
        Self {
            configured: true,
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::replying(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::replying(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn transcribe(&self, _image: &str) -> Result<String, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TranscribeError::EmptyContent))
    }
}

pub fn test_config() -> BookingConfig {
    BookingConfig {
        account: Some("411122051".into()),
        password: Some("secret".into()),
        debug_dir: None,
        timings: Timings::instant(),
        ..BookingConfig::default()
    }
}

pub fn src(uri: &str) -> Captcha {
    Captcha::Src(uri.to_string())
}
