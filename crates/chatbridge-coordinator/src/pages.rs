//! Page acquisition: reuse an open page or open one, then wait for it to load.

use std::time::Duration;

use chatbridge_core::config::CoordinatorConfig;
use chatbridge_core::error::Result;
use chatbridge_core::traits::{PageHost, PageId, PageKind};

const LOAD_SETTLE: Duration = Duration::from_millis(500);

/// Find or open a page of `kind`, activate it and wait for its load.
pub async fn acquire_page(host: &dyn PageHost, kind: PageKind, config: &CoordinatorConfig) -> Result<PageId> {
    let (page, bound) = match host.find_page(kind).await? {
        Some(page) => {
            tracing::debug!("reusing {kind:?} page {}", page.0);
            (page, config.existing_page_load())
        }
        None => {
            let page = host.open_page(kind).await?;
            tracing::info!("🆕 Opened {kind:?} page {}", page.0);
            (page, config.new_page_load())
        }
    };
    host.activate(page).await?;
    wait_for_load(host, page, bound, config.load_poll()).await?;
    Ok(page)
}

/// Poll until loaded. Exceeding `bound` only warns; a vanished page is an error.
pub async fn wait_for_load(host: &dyn PageHost, page: PageId, bound: Duration, poll: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if host.is_loaded(page).await? {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("⚠️ Page {} still loading after {:?}, continuing", page.0, bound);
            break;
        }
        tokio::time::sleep(poll).await;
    }
    tokio::time::sleep(LOAD_SETTLE).await;
    Ok(())
}
