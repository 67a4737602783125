//! Page automation primitives: locate, read, write, click.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

const ELEMENT_POLL: Duration = Duration::from_millis(100);

/// Opaque reference to an element on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

/// A selector understood by the page driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(pub String);

impl Locator {
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for Locator {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Driver over one page's DOM.
///
/// `scope = None` searches the whole document.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn query(&self, scope: Option<ElementHandle>, locator: &Locator) -> Result<Option<ElementHandle>>;

    /// All matches in document order.
    async fn query_all(&self, scope: Option<ElementHandle>, locator: &Locator) -> Result<Vec<ElementHandle>>;

    /// Rendered text content.
    async fn read_text(&self, element: ElementHandle) -> Result<String>;

    /// Replace the element's content, firing whatever input events the page needs.
    async fn set_text(&self, element: ElementHandle, text: &str) -> Result<()>;

    async fn click(&self, element: ElementHandle) -> Result<()>;

    /// Simulated Enter keystroke on the element.
    async fn press_enter(&self, element: ElementHandle) -> Result<()>;

    async fn is_enabled(&self, element: ElementHandle) -> Result<bool>;
}

/// Poll for an element until it appears or `timeout` elapses.
pub async fn wait_for_element(
    driver: &dyn PageDriver,
    locator: &Locator,
    timeout: Duration,
) -> Result<Option<ElementHandle>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(el) = driver.query(None, locator).await? {
            return Ok(Some(el));
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::debug!("element not found within {:?}: {}", timeout, locator);
            return Ok(None);
        }
        tokio::time::sleep(ELEMENT_POLL).await;
    }
}

/// First locator in the list that currently matches, with its index.
pub async fn locate_first_of(
    driver: &dyn PageDriver,
    scope: Option<ElementHandle>,
    locators: &[String],
) -> Result<Option<(usize, ElementHandle)>> {
    for (idx, selector) in locators.iter().enumerate() {
        if let Some(el) = driver.query(scope, &Locator::from(selector)).await? {
            return Ok(Some((idx, el)));
        }
    }
    Ok(None)
}

/// Best-effort click: pointer click, then keyboard activation.
/// Absence of an error is the only success signal available.
pub async fn attempt_click(driver: &dyn PageDriver, element: ElementHandle) -> Result<()> {
    match driver.click(element).await {
        Ok(()) => Ok(()),
        Err(click_err) => {
            tracing::debug!("click failed on {:?}, trying keyboard activation: {click_err}", element);
            driver
                .press_enter(element)
                .await
                .map_err(|e| BridgeError::Page(format!("all click sequences failed: {click_err}; {e}")))
        }
    }
}
