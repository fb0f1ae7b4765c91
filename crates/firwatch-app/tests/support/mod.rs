//! Scripted stand-in for the FIR portal used by the integration specs.
//!
//! Renders the search form, the result grid with a numeric pager and the
//! "no records" marker; clicking a row's download control drops a PDF into
//! whatever directory the session was told to download into.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use firwatch_app::pipeline::{RunEvent, RunObserver};
use firwatch_app::portal::{PortalError, PortalLauncher, PortalSelectors, PortalSession};
use scraper::{Html, Selector};

pub const ANIMAL_ACT: &str = "Prevention of Cruelty to Animals Act, 1960";
pub const OTHER_ACT: &str = "Indian Penal Code";

#[derive(Debug, Clone)]
pub struct FakeRow {
    pub fir_number: String,
    pub act: String,
    pub downloadable: bool,
    /// The click starts a download that never finishes.
    pub stalls: bool,
}

impl FakeRow {
    pub fn matching(fir_number: &str) -> Self {
        Self {
            fir_number: fir_number.to_string(),
            act: ANIMAL_ACT.to_string(),
            downloadable: true,
            stalls: false,
        }
    }

    pub fn other(fir_number: &str) -> Self {
        Self {
            fir_number: fir_number.to_string(),
            act: OTHER_ACT.to_string(),
            downloadable: true,
            stalls: false,
        }
    }

    pub fn without_control(mut self) -> Self {
        self.downloadable = false;
        self
    }

    pub fn stalling(mut self) -> Self {
        self.stalls = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortalScript {
    pub pages: Vec<Vec<FakeRow>>,
    pub no_records: bool,
    /// The search never settles; the results wait must time out.
    pub search_hangs: bool,
    pub browser_download_fails: bool,
    pub page_download_fails: bool,
    /// Show at most this many page numbers, with `...` links to the
    /// neighbouring windows.
    pub pager_window: Option<usize>,
    /// Clicking this page number lands back on page 1.
    pub resets_on_page: Option<usize>,
}

impl PortalScript {
    pub fn with_pages(pages: Vec<Vec<FakeRow>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    fn total(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    /// First and last page number shown by the pager while on `page`.
    fn window(&self, page: usize) -> (usize, usize) {
        let count = self.pages.len();
        match self.pager_window {
            Some(width) if width > 0 => {
                let start = (page - 1) / width * width + 1;
                (start, (start + width - 1).min(count))
            }
            _ => (1, count),
        }
    }
}

#[derive(Debug, Default)]
pub struct PortalLog {
    pub navigations: Vec<String>,
    pub form: Vec<(String, String)>,
    pub clicks: Vec<String>,
    pub downloads: usize,
    pub launches: usize,
    pub closed: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    searched: bool,
    current: usize,
    download_dir: Option<PathBuf>,
    log: PortalLog,
}

pub struct FakePortal {
    script: PortalScript,
    selectors: PortalSelectors,
    state: Mutex<FakeState>,
}

impl FakePortal {
    pub fn new(script: PortalScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            selectors: PortalSelectors::default(),
            state: Mutex::new(FakeState {
                current: 1,
                ..FakeState::default()
            }),
        })
    }

    pub fn with_log<R>(&self, f: impl FnOnce(&PortalLog) -> R) -> R {
        f(&self.state.lock().expect("fake state").log)
    }

    fn render(&self, state: &FakeState) -> String {
        let search_button = r#"<input type="submit" id="ContentPlaceHolder1_btnSearch" value="Search" />"#;
        if !state.searched || self.script.search_hangs {
            return format!("<html><body><form>{search_button}</form></body></html>");
        }
        if self.script.no_records {
            return format!(
                "<html><body><form>{search_button}</form>\
                 <span id=\"ContentPlaceHolder1_lblNoRecord\">No Records Found</span></body></html>"
            );
        }

        let page = state.current;
        let mut rows = String::new();
        let current_rows = self.script.pages.get(page - 1).map(Vec::as_slice).unwrap_or(&[]);
        for (idx, row) in current_rows.iter().enumerate() {
            let control = if row.downloadable {
                format!(r#"<input type="image" id="dl_{page}_{idx}" />"#)
            } else {
                String::new()
            };
            rows.push_str(&format!(
                "<tr><td>{sr}</td><td>Maharashtra</td><td>PUNE CITY</td><td>Shivajinagar</td>\
                 <td>2024</td><td>{fir}</td><td>02/01/2024</td><td>11(1)(a)</td><td>{act}</td>\
                 <td>{control}</td></tr>",
                sr = idx + 1,
                fir = row.fir_number,
                act = row.act,
            ));
        }

        let mut pager = String::new();
        if self.script.pages.len() > 1 {
            let (start, end) = self.script.window(page);
            let mut cells = String::new();
            if start > 1 {
                cells.push_str("<td><a href=\"#\">...</a></td>");
            }
            for n in start..=end {
                if n == page {
                    cells.push_str(&format!("<td><span>{n}</span></td>"));
                } else {
                    cells.push_str(&format!("<td><a href=\"#\">{n}</a></td>"));
                }
            }
            if end < self.script.pages.len() {
                cells.push_str("<td><a href=\"#\">...</a></td>");
            }
            pager = format!(
                "<tr class=\"pager\"><td colspan=\"10\"><table><tr>{cells}</tr></table></td></tr>"
            );
        }

        format!(
            "<html><body><form>{search_button}</form>\
             <span id=\"ContentPlaceHolder1_lbltotalrecord\">Total Records : {total}</span>\
             <table id=\"ContentPlaceHolder1_gdvDeadBody\">\
             <tr><th>Sr.No.</th><th>State</th><th>District</th><th>Police Station</th><th>Year</th>\
             <th>FIR No.</th><th>Date</th><th>Sections</th><th>Act</th><th>Download</th></tr>\
             {rows}{pager}</table></body></html>",
            total = self.script.total()
        )
    }

    fn html(&self) -> String {
        let state = self.state.lock().expect("fake state");
        self.render(&state)
    }

    fn click_trigger(&self, selector: &str) -> Result<(), PortalError> {
        let missing = || PortalError::ElementNotFound {
            selector: selector.to_string(),
        };
        let id = selector
            .strip_prefix("[id=\"dl_")
            .and_then(|rest| rest.strip_suffix("\"]"))
            .ok_or_else(missing)?;
        let (page, idx) = id.split_once('_').ok_or_else(missing)?;
        let page: usize = page.parse().map_err(|_| missing())?;
        let idx: usize = idx.parse().map_err(|_| missing())?;

        let mut state = self.state.lock().expect("fake state");
        let exists = self
            .script
            .pages
            .get(page.wrapping_sub(1))
            .is_some_and(|rows| idx < rows.len());
        if page != state.current || !exists {
            return Err(missing());
        }
        state.log.clicks.push(selector.to_string());
        state.log.downloads += 1;
        if let Some(dir) = state.download_dir.clone() {
            let mut name = format!("FIR_Copy_{}.pdf", state.log.downloads);
            if self.script.pages[page - 1][idx].stalls {
                name.push_str(".crdownload");
            }
            std::fs::write(dir.join(name), b"%PDF-1.4 fake fir copy").map_err(|err| {
                PortalError::Protocol {
                    stage: "download",
                    message: err.to_string(),
                }
            })?;
        }
        Ok(())
    }
}

fn selector_matches(html: &str, selector: &str) -> Result<bool, PortalError> {
    let parsed = Selector::parse(selector).map_err(|err| PortalError::Protocol {
        stage: "selector",
        message: err.to_string(),
    })?;
    Ok(Html::parse_document(html).select(&parsed).next().is_some())
}

pub struct FakeSession(Arc<FakePortal>);

#[async_trait]
impl PortalSession for FakeSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), PortalError> {
        let mut state = self.0.state.lock().expect("fake state");
        state.log.navigations.push(url.to_string());
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), PortalError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let html = self.0.html();
            if selector_matches(&html, selector)? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PortalError::Timeout {
                    what: selector.to_string(),
                    after: timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), PortalError> {
        let mut state = self.0.state.lock().expect("fake state");
        state.log.form.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), PortalError> {
        let mut state = self.0.state.lock().expect("fake state");
        state.log.form.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), PortalError> {
        if selector == self.0.selectors.search_button {
            let mut state = self.0.state.lock().expect("fake state");
            state.searched = true;
            state.current = 1;
            state.log.clicks.push(selector.to_string());
            return Ok(());
        }
        self.0.click_trigger(selector)
    }

    async fn click_link_text(&self, _scope: &str, text: &str) -> Result<(), PortalError> {
        let script = &self.0.script;
        let mut state = self.0.state.lock().expect("fake state");
        let (start, end) = script.window(state.current);
        let landing = match text {
            // The last `...` wins, matching the browser session.
            "..." if end < script.pages.len() => Some(end + 1),
            "..." if start > 1 => Some(start - 1),
            _ => text
                .parse::<usize>()
                .ok()
                .filter(|page| (start..=end).contains(page) && *page != state.current),
        };
        let Some(page) = landing else {
            return Err(PortalError::LinkNotFound {
                scope: "pager".to_string(),
                text: text.to_string(),
            });
        };
        state.log.clicks.push(format!("page:{text}"));
        state.current = if script.resets_on_page == Some(page) { 1 } else { page };
        Ok(())
    }

    async fn page_html(&self) -> Result<String, PortalError> {
        Ok(self.0.html())
    }

    async fn set_download_dir_browser(&self, dir: &Path) -> Result<(), PortalError> {
        if self.0.script.browser_download_fails {
            return Err(PortalError::Protocol {
                stage: "download_setup",
                message: "Browser.setDownloadBehavior not supported".to_string(),
            });
        }
        self.0.state.lock().expect("fake state").download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn set_download_dir_page(&self, dir: &Path) -> Result<(), PortalError> {
        if self.0.script.page_download_fails {
            return Err(PortalError::Protocol {
                stage: "download_setup",
                message: "Page.setDownloadBehavior not supported".to_string(),
            });
        }
        self.0.state.lock().expect("fake state").download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<(), PortalError> {
        self.0.state.lock().expect("fake state").log.closed += 1;
        Ok(())
    }
}

pub struct FakeLauncher {
    pub portal: Arc<FakePortal>,
    pub fail: bool,
}

impl FakeLauncher {
    pub fn new(portal: Arc<FakePortal>) -> Arc<Self> {
        Arc::new(Self {
            portal,
            fail: false,
        })
    }
}

#[async_trait]
impl PortalLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn PortalSession>, PortalError> {
        if self.fail {
            return Err(PortalError::Launch("chrome binary not found".to_string()));
        }
        self.portal.state.lock().expect("fake state").log.launches += 1;
        Ok(Box::new(FakeSession(self.portal.clone())))
    }
}

/// Observer that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().expect("events").clone()
    }
}

impl RunObserver for RecordingObserver {
    fn on_event(&self, _job_id: &str, event: RunEvent) {
        self.events.lock().expect("events").push(event);
    }
}
