// src/page.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thirtyfour::components::SelectElement;
use thirtyfour::prelude::*;

/// How an element is located on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    XPath(String),
    Css(String),
}

impl Locator {
    pub fn id(s: impl Into<String>) -> Self {
        Locator::Id(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        Locator::XPath(s.into())
    }

    fn by(&self) -> By {
        match self {
            Locator::Id(s) => By::Id(s.clone()),
            Locator::XPath(s) => By::XPath(s.clone()),
            Locator::Css(s) => By::Css(s.clone()),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Id(s) => write!(f, "#{s}"),
            Locator::XPath(s) => write!(f, "xpath={}", s.split_whitespace().collect::<Vec<_>>().join(" ")),
            Locator::Css(s) => write!(f, "css={s}"),
        }
    }
}

/// Element-level browser operations the booking flow and the captcha loop need.
#[async_trait]
pub trait PageAutomation: Send + Sync {
    type Element: Send + Sync;

    async fn goto(&self, url: &str) -> Result<()>;
    async fn find_element(&self, locator: &Locator) -> Result<Self::Element>;
    async fn wait_for_present(&self, locator: &Locator, timeout: Duration) -> Result<Self::Element>;
    async fn wait_for_clickable(&self, locator: &Locator, timeout: Duration) -> Result<Self::Element>;
    async fn read_attribute(&self, element: &Self::Element, name: &str) -> Result<Option<String>>;
    async fn clear(&self, element: &Self::Element) -> Result<()>;
    async fn type_text(&self, element: &Self::Element, text: &str) -> Result<()>;
    async fn click(&self, element: &Self::Element) -> Result<()>;
    /// Click through `arguments[0].click()`, bypassing overlay checks.
    async fn js_click(&self, element: &Self::Element) -> Result<()>;
    async fn scroll_into_view(&self, element: &Self::Element) -> Result<()>;
    async fn select_by_value(&self, element: &Self::Element, value: &str) -> Result<()>;
    async fn execute_script(&self, code: &str) -> Result<Value>;
    async fn page_source(&self) -> Result<String>;
}

/// [`PageAutomation`] over a live thirtyfour session.
pub struct WebDriverPage {
    driver: WebDriver,
}

impl WebDriverPage {
    pub fn new(driver: WebDriver) -> Self {
        Self { driver }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[async_trait]
impl PageAutomation for WebDriverPage {
    type Element = WebElement;

    async fn goto(&self, url: &str) -> Result<()> {
        self.driver.goto(url).await.with_context(|| format!("navigate to {url}"))
    }

    async fn find_element(&self, locator: &Locator) -> Result<WebElement> {
        self.driver
            .find(locator.by())
            .await
            .with_context(|| format!("element {locator} not found"))
    }

    async fn wait_for_present(&self, locator: &Locator, timeout: Duration) -> Result<WebElement> {
        self.driver
            .query(locator.by())
            .wait(timeout, POLL_INTERVAL)
            .first()
            .await
            .with_context(|| format!("element {locator} not present within {timeout:?}"))
    }

    async fn wait_for_clickable(&self, locator: &Locator, timeout: Duration) -> Result<WebElement> {
        self.driver
            .query(locator.by())
            .wait(timeout, POLL_INTERVAL)
            .and_clickable()
            .first()
            .await
            .with_context(|| format!("element {locator} not clickable within {timeout:?}"))
    }

    async fn read_attribute(&self, element: &WebElement, name: &str) -> Result<Option<String>> {
        element
            .attr(name)
            .await
            .with_context(|| format!("read attribute '{name}'"))
    }

    async fn clear(&self, element: &WebElement) -> Result<()> {
        element.clear().await.context("clear element")
    }

    async fn type_text(&self, element: &WebElement, text: &str) -> Result<()> {
        element.send_keys(text).await.context("type into element")
    }

    async fn click(&self, element: &WebElement) -> Result<()> {
        element.click().await.context("click element")
    }

    async fn js_click(&self, element: &WebElement) -> Result<()> {
        self.driver
            .execute("arguments[0].click();", vec![element.to_json()?])
            .await
            .context("script click")?;
        Ok(())
    }

    async fn scroll_into_view(&self, element: &WebElement) -> Result<()> {
        self.driver
            .execute("arguments[0].scrollIntoView(true);", vec![element.to_json()?])
            .await
            .context("scroll into view")?;
        Ok(())
    }

    async fn select_by_value(&self, element: &WebElement, value: &str) -> Result<()> {
        let select = SelectElement::new(element).await.context("wrap <select>")?;
        select
            .select_by_value(value)
            .await
            .with_context(|| format!("select option '{value}'"))
    }

    async fn execute_script(&self, code: &str) -> Result<Value> {
        let ret = self
            .driver
            .execute(code, Vec::new())
            .await
            .context("execute script")?;
        Ok(ret.json().clone())
    }

    async fn page_source(&self) -> Result<String> {
        self.driver.source().await.context("read page source")
    }
}

/// Well-known identifiers on the sports-centre reservation site.
pub mod selectors {
    use super::Locator;

    pub const CAPTCHA_IMAGE: &str = "imgCaptcha";
    pub const CAPTCHA_INPUT: &str = "txtCaptchaValue";
    pub const REFRESH_BUTTON_XPATH: &str =
        "//button[@type='button' and @onclick='refreshCaptcha()' and contains(text(),'換一張')]";
    pub const SUBMIT_BUTTON_XPATH: &str =
        "//button[@type='button' and text()='申請' and starts-with(@onclick, 'doApp(')]";

    pub const LOGIN_ACCOUNT: &str = "MainContent_TxtUSERNO";
    pub const LOGIN_PASSWORD: &str = "MainContent_TxtPWD";
    pub const LOGIN_BUTTON: &str = "MainContent_Button1";
    pub const RESERVATION_ENTRY: &str = "MainContent_Button2";
    pub const DATE_BOX: &str = "MainContent_TextBox1";
    pub const QUERY_BUTTON: &str = "MainContent_Button1";
    pub const COURT_DROPDOWN: &str = "MainContent_DropDownList1";

    pub fn captcha_image() -> Locator {
        Locator::id(CAPTCHA_IMAGE)
    }

    pub fn captcha_input() -> Locator {
        Locator::id(CAPTCHA_INPUT)
    }

    pub fn refresh_button() -> Locator {
        Locator::xpath(REFRESH_BUTTON_XPATH)
    }

    pub fn submit_button() -> Locator {
        Locator::xpath(SUBMIT_BUTTON_XPATH)
    }

    /// Apply button of the row whose slot label contains `slot` (e.g. "06~08").
    /// The row is matched on the slot's starting hour.
    pub fn time_slot_button(slot: &str) -> Locator {
        let hour = slot.split('~').next().unwrap_or(slot).trim();
        Locator::xpath(format!(
            "//tr[td[contains(text(), '{hour}')] and td/button[contains(@type, 'button') \
             and contains(., '[申請]') and contains(., '{slot}')]]//button"
        ))
    }
}
