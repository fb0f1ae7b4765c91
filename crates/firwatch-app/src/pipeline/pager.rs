//! Result-grid pagination: deciding the next pager action and the loop guard.

use std::collections::HashSet;
use std::time::Duration;

use scraper::{ElementRef, Html};
use tokio::time::{Instant, sleep};

use crate::pipeline::extract::{ResultSelectors, RowFingerprint, text_content};
use crate::portal::{PortalError, PortalSelectors, PortalSession};

/// Plan/act rounds allowed for one page advancement.
pub const MAX_ADVANCE_ATTEMPTS: usize = 3;

const ELLIPSIS_LABELS: &[&str] = &["...", "…"];
const PAGE_CHANGE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerStep {
    /// The pager already marks the target page as current.
    AlreadyOn,
    /// A link labelled with the target page number exists.
    Click(String),
    /// Only an ellipsis link exists; clicking it reveals further page links.
    Reveal(String),
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    Fresh,
    Repeated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced(u64),
    Exhausted,
}

/// Current page plus every first-row fingerprint seen so far in the run.
#[derive(Debug)]
pub struct PageCursor {
    current: u64,
    seen: HashSet<RowFingerprint>,
    advance_attempts: u64,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCursor {
    pub fn new() -> Self {
        Self {
            current: 1,
            seen: HashSet::new(),
            advance_attempts: 0,
        }
    }

    pub fn current_page(&self) -> u64 {
        self.current
    }

    /// Number of `advance` calls made so far.
    pub fn advance_attempts(&self) -> u64 {
        self.advance_attempts
    }

    /// A repeated first row means the upstream pager reset.
    pub fn observe(&mut self, fingerprint: RowFingerprint) -> PageVerdict {
        if self.seen.insert(fingerprint) {
            PageVerdict::Fresh
        } else {
            PageVerdict::Repeated
        }
    }

    fn moved_to(&mut self, page: u64) {
        debug_assert!(page > self.current);
        self.current = page;
    }
}

/// Pure decision over the rendered pager.
pub fn plan_step(
    html: &str,
    selectors: &ResultSelectors,
    target_page: u64,
    revealed: bool,
) -> PagerStep {
    let document = Html::parse_document(html);
    let target = target_page.to_string();

    let Some(pager) = document.select(&selectors.pager).next() else {
        return PagerStep::Exhausted;
    };

    if pager
        .select(&selectors.pager_current)
        .any(|current| text_content(&current) == target)
    {
        return PagerStep::AlreadyOn;
    }

    if pager
        .select(&selectors.pager_link)
        .any(|link| text_content(&link) == target)
    {
        return PagerStep::Click(target);
    }
    if !revealed {
        if let Some(label) = forward_ellipsis(pager, selectors) {
            return PagerStep::Reveal(label);
        }
    }
    PagerStep::Exhausted
}

/// Last ellipsis link placed after the current-page marker. A leading
/// ellipsis points back to earlier pages and never counts.
fn forward_ellipsis(pager: ElementRef<'_>, selectors: &ResultSelectors) -> Option<String> {
    let current: Vec<_> = pager.select(&selectors.pager_current).map(|el| el.id()).collect();
    let links: Vec<_> = pager.select(&selectors.pager_link).map(|el| el.id()).collect();

    // Without a marker, anything after a numbered link is forward.
    let mut past_current = false;
    let mut found = None;
    for node in pager.descendants() {
        if current.contains(&node.id()) {
            past_current = true;
            continue;
        }
        if !links.contains(&node.id()) {
            continue;
        }
        let Some(link) = ElementRef::wrap(node) else {
            continue;
        };
        let label = text_content(&link);
        if ELLIPSIS_LABELS.contains(&label.as_str()) {
            if past_current {
                found = Some(label);
            }
        } else if current.is_empty() && label.parse::<u64>().is_ok() {
            past_current = true;
        }
    }
    found
}

/// Move the portal from the cursor's page to the next one.
pub async fn advance(
    session: &dyn PortalSession,
    cursor: &mut PageCursor,
    selectors: &PortalSelectors,
    timeout: Duration,
) -> Result<AdvanceOutcome, PortalError> {
    let target = cursor.current_page() + 1;
    let mut revealed = false;
    cursor.advance_attempts += 1;

    for attempt in 1..=MAX_ADVANCE_ATTEMPTS {
        let html = session.page_html().await?;
        let step = plan_with(selectors, &html, target, revealed)?;
        tracing::debug!(stage = "paging", target, attempt, ?step, "pager step planned");

        match step {
            PagerStep::AlreadyOn => {
                cursor.moved_to(target);
                return Ok(AdvanceOutcome::Advanced(target));
            }
            PagerStep::Click(label) => {
                // Whatever page the portal lands on is processed next; a reset
                // back to an earlier page shows up as a repeated first row.
                session.click_link_text(&selectors.pager, &label).await?;
                wait_for_rerender(session, selectors, &html, timeout).await?;
                cursor.moved_to(target);
                return Ok(AdvanceOutcome::Advanced(target));
            }
            PagerStep::Reveal(label) => {
                session.click_link_text(&selectors.pager, &label).await?;
                wait_for_rerender(session, selectors, &html, timeout).await?;
                revealed = true;
            }
            PagerStep::Exhausted => return Ok(AdvanceOutcome::Exhausted),
        }
    }

    tracing::warn!(stage = "paging", target, "pager did not reach the next page");
    Ok(AdvanceOutcome::Exhausted)
}

// Parsed selectors and documents stay inside sync helpers so the futures
// driving a job remain `Send`.
fn plan_with(
    selectors: &PortalSelectors,
    html: &str,
    target: u64,
    revealed: bool,
) -> Result<PagerStep, PortalError> {
    let compiled =
        ResultSelectors::compile(selectors).map_err(|err| PortalError::protocol("pager", err))?;
    Ok(plan_step(html, &compiled, target, revealed))
}

async fn wait_for_rerender(
    session: &dyn PortalSession,
    selectors: &PortalSelectors,
    before: &str,
    timeout: Duration,
) -> Result<(), PortalError> {
    wait_for_change(session, before, timeout).await?;
    session
        .wait_for_selector(&selectors.results_table, timeout)
        .await
}

async fn wait_for_change(
    session: &dyn PortalSession,
    before: &str,
    timeout: Duration,
) -> Result<(), PortalError> {
    let deadline = Instant::now() + timeout;
    loop {
        if session.page_html().await? != before {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(PortalError::timeout("results grid to re-render", timeout));
        }
        sleep(PAGE_CHANGE_POLL).await;
    }
}
