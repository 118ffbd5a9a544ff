// src/booking.rs
//
// Page flow up to the captcha: login, reservation page, date, court, slot.
use anyhow::{bail, Context, Result};
use std::future::Future;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::BookingConfig;
use crate::page::{selectors, Locator, PageAutomation};

/// Bring the session to the point where the captcha dialog is showing.
///
/// Login and opening the reservation page must succeed. Date, court and slot
/// selection are tried in order and only logged on failure; the captcha loop
/// will notice if the dialog never appeared.
pub async fn prepare<P: PageAutomation>(page: &P, cfg: &BookingConfig) -> Result<()> {
    login(page, cfg).await.context("login failed")?;
    open_reservation(page, cfg)
        .await
        .context("could not open the reservation page")?;

    best_effort("set booking date", select_date(page, cfg)).await;
    best_effort("select court", select_court(page, cfg)).await;
    best_effort("select time slot", select_time_slot(page, cfg)).await;
    Ok(())
}

async fn best_effort(step: &str, fut: impl Future<Output = Result<()>>) {
    match fut.await {
        Ok(()) => info!("{step}: done"),
        Err(e) => error!("{step} failed: {e:?}"),
    }
}

pub async fn login<P: PageAutomation>(page: &P, cfg: &BookingConfig) -> Result<()> {
    let (Some(account), Some(password)) = (cfg.account.as_deref(), cfg.password.as_deref()) else {
        bail!("ACCOUNT or PASSWORD missing from environment");
    };
    let wait = cfg.timings.element_timeout;

    info!(url = %cfg.login_url, "opening login page");
    page.goto(&cfg.login_url).await?;

    let account_input = page
        .wait_for_present(&Locator::id(selectors::LOGIN_ACCOUNT), wait)
        .await?;
    let password_input = page
        .wait_for_present(&Locator::id(selectors::LOGIN_PASSWORD), wait)
        .await?;
    page.clear(&account_input).await?;
    page.clear(&password_input).await?;
    page.type_text(&account_input, account).await?;
    page.type_text(&password_input, password).await?;

    let button = page
        .wait_for_clickable(&Locator::id(selectors::LOGIN_BUTTON), wait)
        .await?;
    page.click(&button).await?;
    Ok(())
}

pub async fn open_reservation<P: PageAutomation>(page: &P, cfg: &BookingConfig) -> Result<()> {
    let entry = page
        .wait_for_clickable(&Locator::id(selectors::RESERVATION_ENTRY), cfg.timings.element_timeout)
        .await?;
    page.click(&entry).await?;
    sleep(cfg.timings.page_settle).await;
    Ok(())
}

pub async fn select_date<P: PageAutomation>(page: &P, cfg: &BookingConfig) -> Result<()> {
    let date = cfg.target_date.trim();
    check_date(date)?;

    page.execute_script(&date_postback_script(date)).await?;
    sleep(cfg.timings.page_settle).await;

    let query = page
        .wait_for_clickable(&Locator::id(selectors::QUERY_BUTTON), cfg.timings.element_timeout)
        .await?;
    page.js_click(&query).await?;
    sleep(cfg.timings.page_settle).await;
    info!(date, "booking date set");
    Ok(())
}

pub async fn select_court<P: PageAutomation>(page: &P, cfg: &BookingConfig) -> Result<()> {
    let dropdown = page
        .find_element(&Locator::id(selectors::COURT_DROPDOWN))
        .await?;
    page.select_by_value(&dropdown, &cfg.court).await?;
    sleep(cfg.timings.select_settle).await;

    page.execute_script("__doPostBack('ctl00$MainContent$DropDownList1','')")
        .await?;
    sleep(cfg.timings.page_settle).await;
    info!(court = %cfg.court, "court selected");
    Ok(())
}

pub async fn select_time_slot<P: PageAutomation>(page: &P, cfg: &BookingConfig) -> Result<()> {
    sleep(cfg.timings.select_settle).await;

    let button = page
        .wait_for_present(&selectors::time_slot_button(&cfg.time_slot), cfg.timings.element_timeout)
        .await?;
    page.scroll_into_view(&button).await?;
    sleep(cfg.timings.select_settle).await;
    page.js_click(&button).await?;
    sleep(cfg.timings.select_settle).await;
    info!(slot = %cfg.time_slot, "time slot selected");
    Ok(())
}

/// The date is spliced into a script, so only `YYYY/MM/DD` is accepted.
fn check_date(date: &str) -> Result<()> {
    let parts: Vec<&str> = date.split('/').collect();
    let shaped = parts.len() == 3
        && [4, 2, 2].iter().zip(&parts).all(|(len, p)| {
            p.len() == *len && p.chars().all(|c| c.is_ascii_digit())
        });
    if !shaped {
        bail!("booking date '{date}' is not in YYYY/MM/DD form");
    }
    Ok(())
}

fn date_postback_script(date: &str) -> String {
    format!(
        "document.getElementById('{}').value = '{date}';\n\
         __doPostBack('ctl00$MainContent$TextBox1','');",
        selectors::DATE_BOX
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_shape_is_enforced() {
        assert!(check_date("2025/06/20").is_ok());
        assert!(check_date("2025-06-20").is_err());
        assert!(check_date("2025/6/20").is_err());
        assert!(check_date("2025/06/20'); alert(1); ('").is_err());
    }

    #[test]
    fn postback_script_targets_date_box() {
        let js = date_postback_script("2025/06/20");
        assert!(js.contains("getElementById('MainContent_TextBox1').value = '2025/06/20'"));
        assert!(js.contains("__doPostBack('ctl00$MainContent$TextBox1','')"));
    }
}
