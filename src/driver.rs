// src/driver.rs
use anyhow::{bail, Context, Result};
use std::env;
use std::fs::File;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use tracing::{info, warn};
use which::which;

/// One browser session for one booking run.
///
/// Owns the WebDriver handle, the chromedriver process when we spawned it, and
/// the throwaway Chrome profile.
pub struct Session {
    pub driver: WebDriver,
    chromedriver_child: Option<Child>,
    user_data_dir: PathBuf,
}

impl Session {
    /// Attach to `WEBDRIVER_URL` if set, otherwise spawn a local chromedriver.
    pub async fn start() -> Result<Self> {
        let timestamp_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
        let user_data_dir = env::temp_dir().join(format!("court-booker-{timestamp_ms}"));
        let caps = chrome_caps(&user_data_dir)?;

        let (driver_url, chromedriver_child) = match env::var("WEBDRIVER_URL") {
            Ok(url) if !url.trim().is_empty() => {
                info!(%url, "using existing WebDriver endpoint");
                (url, None)
            }
            _ => {
                let port: u16 = env::var("CHROMEDRIVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(9515);
                let child = spawn_chromedriver(port)?;
                (format!("http://127.0.0.1:{port}"), Some(child))
            }
        };

        let driver = match WebDriver::new(&driver_url, caps).await {
            Ok(driver) => driver,
            Err(e) => {
                if let Some(child) = chromedriver_child {
                    reap(child);
                }
                return Err(e).with_context(|| format!("start Chrome session via {driver_url}"));
            }
        };

        Ok(Self {
            driver,
            chromedriver_child,
            user_data_dir,
        })
    }

    /// End the run. With `keep_open` the browser is left detached for manual inspection.
    pub async fn finish(mut self, keep_open: bool) {
        if keep_open {
            // dropping the last handle would delete the session
            if let Err(e) = self.driver.clone().leak() {
                warn!("failed to detach from browser session: {e}");
            }
            info!("leaving browser open for inspection");
            return;
        }
        if let Err(e) = self.driver.clone().quit().await {
            warn!("failed to quit browser: {e}");
        }
        if let Some(child) = self.chromedriver_child.take() {
            reap(child);
        }
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
    }
}

fn chrome_caps(user_data_dir: &Path) -> Result<ChromeCapabilities> {
    let mut caps = DesiredCapabilities::chrome();

    if let Ok(bin) = env::var("CHROME_BIN") {
        caps.set_binary(&bin)?;
    } else if let Some(bin) = find_chrome_bin() {
        caps.set_binary(&bin)?;
    }

    caps.add_arg(&format!("--user-data-dir={}", user_data_dir.to_string_lossy()))?;
    caps.add_arg("--start-maximized")?;
    caps.add_arg("--disable-popup-blocking")?;
    caps.add_arg("--no-default-browser-check")?;
    caps.add_arg("--no-first-run")?;
    if env::var("HEADLESS").map_or(false, |v| v == "1") {
        caps.add_arg("--headless=new")?;
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--disable-dev-shm-usage")?;
    }

    // keep the window alive when chromedriver goes away
    caps.add_experimental_option("detach", true)?;
    caps.add_experimental_option("excludeSwitches", vec!["enable-automation"])?;
    caps.add_experimental_option("useAutomationExtension", false)?;
    Ok(caps)
}

fn spawn_chromedriver(port: u16) -> Result<Child> {
    let chromedriver =
        which("chromedriver").context("chromedriver not found in PATH. Install it or set WEBDRIVER_URL.")?;
    let log_file = File::create(log_path()).context("cannot create chromedriver.log")?;

    let child = Command::new(&chromedriver)
        .arg(format!("--port={port}"))
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file))
        .spawn()
        .with_context(|| format!("failed to spawn {}", chromedriver.display()))?;

    if let Err(e) = wait_for_port("127.0.0.1", port, Duration::from_secs(10)) {
        reap(child);
        return Err(e.context("chromedriver did not become ready on time"));
    }
    Ok(child)
}

fn reap(mut child: Child) {
    if let Err(e) = child.kill() {
        warn!("failed to stop chromedriver: {e}");
    }
    let _ = child.wait();
}

fn wait_for_port(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect((host, port)).is_ok() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(150));
    }
    bail!("port {}:{} did not open within {:?}", host, port, timeout)
}

fn find_chrome_bin() -> Option<String> {
    for cand in [
        "google-chrome",
        "google-chrome-stable",
        "chromium-browser",
        "chromium",
    ] {
        if let Ok(p) = which(cand) {
            return Some(p.to_string_lossy().into_owned());
        }
    }
    None
}

fn log_path() -> PathBuf {
    env::var("CHROMEDRIVER_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("chromedriver.log"))
}
