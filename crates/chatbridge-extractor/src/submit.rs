//! Input location, text entry and the submission fallback chain.

use chatbridge_core::config::ExtractorConfig;
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::traits::page::{attempt_click, locate_first_of, wait_for_element};
use chatbridge_core::traits::{ElementHandle, Locator, PageDriver};

/// How (or whether) the question was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A send control was clicked.
    Clicked,
    /// Enter changed the input, so the page took the question.
    EnterAccepted,
    /// The send control is disabled; the page is already generating.
    Processing,
    /// Nothing confirmed or refuted the submission.
    Unknown,
}

/// Find the input: primary locator first, then the fallback.
pub async fn locate_input(driver: &dyn PageDriver, config: &ExtractorConfig) -> Result<ElementHandle> {
    let loc = &config.locators;
    if let Some(el) = wait_for_element(driver, &Locator::from(&loc.primary_input), config.primary_input_wait()).await? {
        return Ok(el);
    }
    tracing::debug!("primary input missing, trying fallback locator");
    if let Some(el) = wait_for_element(driver, &Locator::from(&loc.fallback_input), config.fallback_input_wait()).await? {
        return Ok(el);
    }
    Err(BridgeError::Page("Could not find the ChatGPT input box".into()))
}

/// Set the text and check it rendered. One retry, then proceed with a warning.
/// Returns whether the rendered text matched.
pub async fn enter_text(driver: &dyn PageDriver, input: ElementHandle, text: &str) -> Result<bool> {
    for attempt in 1..=2 {
        driver.set_text(input, text).await?;
        let rendered = driver.read_text(input).await?;
        if rendered.trim() == text.trim() {
            return Ok(true);
        }
        tracing::debug!("input text mismatch after attempt {attempt}");
    }
    tracing::warn!("⚠️ Input text does not match the question, submitting anyway");
    Ok(false)
}

enum ControlState {
    Clicked,
    Disabled,
    Unavailable,
}

async fn try_send_controls(driver: &dyn PageDriver, config: &ExtractorConfig) -> Result<ControlState> {
    let Some((idx, control)) = locate_first_of(driver, None, &config.locators.send_controls).await? else {
        return Ok(ControlState::Unavailable);
    };
    if !driver.is_enabled(control).await? {
        return Ok(ControlState::Disabled);
    }
    match attempt_click(driver, control).await {
        Ok(()) => {
            tracing::debug!("send control #{idx} clicked");
            Ok(ControlState::Clicked)
        }
        Err(e) => {
            tracing::debug!("send control #{idx} not clickable: {e}");
            Ok(ControlState::Unavailable)
        }
    }
}

/// Submit whatever is in `input`.
pub async fn submit(
    driver: &dyn PageDriver,
    input: ElementHandle,
    question: &str,
    config: &ExtractorConfig,
) -> Result<SubmitOutcome> {
    match try_send_controls(driver, config).await? {
        ControlState::Clicked => return Ok(SubmitOutcome::Clicked),
        ControlState::Disabled => return Ok(SubmitOutcome::Processing),
        ControlState::Unavailable => {}
    }

    driver.press_enter(input).await?;
    tokio::time::sleep(config.post_enter()).await;
    let after = driver.read_text(input).await.unwrap_or_default();
    if after.trim() != question.trim() {
        return Ok(SubmitOutcome::EnterAccepted);
    }

    Ok(match try_send_controls(driver, config).await? {
        ControlState::Clicked => SubmitOutcome::Clicked,
        ControlState::Disabled => SubmitOutcome::Processing,
        ControlState::Unavailable => SubmitOutcome::Unknown,
    })
}
