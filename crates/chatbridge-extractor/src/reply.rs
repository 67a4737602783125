//! Reading the most recent generated reply off the page.

use chatbridge_core::config::ExtractorLocators;
use chatbridge_core::error::Result;
use chatbridge_core::traits::{ElementHandle, Locator, PageDriver};

/// Latest reply text, or empty when none is rendered.
///
/// Walks last turn → assistant message → reply body → paragraphs. If that
/// structure is absent, takes the last reply body anywhere on the page.
pub async fn extract_reply(driver: &dyn PageDriver, loc: &ExtractorLocators) -> Result<String> {
    if let Some(text) = from_last_turn(driver, loc).await? {
        if !text.is_empty() {
            return Ok(text);
        }
    }

    let bodies = driver.query_all(None, &Locator::from(&loc.any_reply)).await?;
    match bodies.last() {
        Some(body) => {
            tracing::debug!("reply taken from fallback locator");
            Ok(driver.read_text(*body).await?.trim().to_string())
        }
        None => Ok(String::new()),
    }
}

async fn from_last_turn(driver: &dyn PageDriver, loc: &ExtractorLocators) -> Result<Option<String>> {
    let turns = driver.query_all(None, &Locator::from(&loc.conversation_turn)).await?;
    let Some(&last) = turns.last() else { return Ok(None) };
    let Some(assistant) = driver.query(Some(last), &Locator::from(&loc.assistant_message)).await? else {
        return Ok(None);
    };
    let Some(body) = driver.query(Some(assistant), &Locator::from(&loc.reply_body)).await? else {
        return Ok(None);
    };
    Ok(Some(body_text(driver, body, loc).await?))
}

async fn body_text(driver: &dyn PageDriver, body: ElementHandle, loc: &ExtractorLocators) -> Result<String> {
    let paragraphs = driver.query_all(Some(body), &Locator::from(&loc.paragraph)).await?;
    if paragraphs.is_empty() {
        return Ok(driver.read_text(body).await?.trim().to_string());
    }
    let mut lines = Vec::with_capacity(paragraphs.len());
    for p in paragraphs {
        let text = driver.read_text(p).await?;
        let text = text.trim();
        if !text.is_empty() {
            lines.push(text.to_string());
        }
    }
    Ok(lines.join("\n"))
}
