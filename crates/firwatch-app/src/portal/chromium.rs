use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior as BrowserDownloadBehavior,
    SetDownloadBehaviorParams as BrowserDownloadParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::types::{Command, Method, MethodId};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use uuid::Uuid;

use super::{PortalError, PortalLauncher, PortalSession};

/// Launch flags for the headless browser.
#[derive(Debug, Clone, Builder)]
pub struct LaunchOptions {
    #[builder(default = true)]
    pub headless: bool,
    #[builder(default = true)]
    pub sandbox: bool,
    pub chrome_executable: Option<PathBuf>,
    #[builder(default)]
    pub extra_args: Vec<String>,
    #[builder(default = (1366, 900))]
    pub window_size: (u32, u32),
    #[builder(default = Duration::from_secs(60))]
    pub request_timeout: Duration,
    /// Interval between visibility probes in `wait_for_selector`.
    #[builder(default = Duration::from_millis(250))]
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    options: LaunchOptions,
}

impl ChromiumLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }
}

struct ChromiumSession {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    profile_dir: PathBuf,
    poll_interval: Duration,
}

#[async_trait]
impl PortalLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn PortalSession>, PortalError> {
        let opts = &self.options;
        let profile_dir = std::env::temp_dir().join(format!("firwatch-profile-{}", Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&profile_dir)
            .window_size(opts.window_size.0, opts.window_size.1)
            .request_timeout(opts.request_timeout);
        if !opts.headless {
            builder = builder.with_head();
        }
        if !opts.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(executable) = &opts.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        if !opts.extra_args.is_empty() {
            builder = builder.args(opts.extra_args.iter().map(String::as_str));
        }
        let config = builder.build().map_err(PortalError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| PortalError::Launch(err.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(error = %err, "browser handler reported an error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                handler.abort();
                return Err(PortalError::Launch(err.to_string()));
            }
        };

        tracing::debug!(profile = %profile_dir.display(), headless = opts.headless, "browser session launched");
        Ok(Box::new(ChromiumSession {
            browser: Mutex::new(browser),
            page,
            handler,
            profile_dir,
            poll_interval: opts.poll_interval,
        }))
    }
}

impl ChromiumSession {
    async fn eval_bool(&self, stage: &'static str, script: String) -> Result<bool, PortalError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(|err| PortalError::protocol(stage, err))?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|err| PortalError::protocol(stage, err))?;
        result
            .into_value::<bool>()
            .map_err(|err| PortalError::protocol(stage, err))
    }

    async fn run_on_element(
        &self,
        stage: &'static str,
        selector: &str,
        body: &str,
    ) -> Result<(), PortalError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; {body} return true; }})()",
            sel = js_string(selector),
        );
        if self.eval_bool(stage, script).await? {
            Ok(())
        } else {
            Err(PortalError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }
}

#[async_trait]
impl PortalSession for ChromiumSession {
    async fn navigate(&self, url: &str, limit: Duration) -> Result<(), PortalError> {
        match timeout(limit, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(PortalError::Navigation {
                url: url.to_string(),
                message: err.to_string(),
            }),
            Err(_) => Err(PortalError::timeout(format!("navigation to {url}"), limit)),
        }
    }

    async fn wait_for_selector(&self, selector: &str, limit: Duration) -> Result<(), PortalError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             const style = window.getComputedStyle(el); \
             return style.display !== 'none' && style.visibility !== 'hidden' && el.getClientRects().length > 0; }})()",
            sel = js_string(selector),
        );
        let deadline = Instant::now() + limit;
        loop {
            match self.eval_bool("wait_for_selector", script.clone()).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // Evaluation fails while a postback replaces the document.
                Err(err) => tracing::trace!(%selector, error = %err, "visibility probe failed"),
            }
            if Instant::now() >= deadline {
                return Err(PortalError::timeout(format!("selector `{selector}`"), limit));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), PortalError> {
        let body = format!(
            "el.focus(); el.value = {value}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); el.blur();",
            value = js_string(value),
        );
        self.run_on_element("fill", selector, &body).await
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), PortalError> {
        let body = format!(
            "el.value = {value}; if (el.value !== {value}) return false; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));",
            value = js_string(value),
        );
        self.run_on_element("select_option", selector, &body).await
    }

    async fn click(&self, selector: &str) -> Result<(), PortalError> {
        let element =
            self.page
                .find_element(selector)
                .await
                .map_err(|_| PortalError::ElementNotFound {
                    selector: selector.to_string(),
                })?;
        element
            .click()
            .await
            .map_err(|err| PortalError::protocol("click", err))?;
        Ok(())
    }

    async fn click_link_text(&self, scope: &str, text: &str) -> Result<(), PortalError> {
        let script = format!(
            "(() => {{ let hit = null; \
               for (const root of document.querySelectorAll({scope})) {{ \
                 for (const link of root.querySelectorAll('a')) {{ \
                   if (link.textContent.trim() === {text}) hit = link; \
                 }} \
               }} \
               if (!hit) return false; hit.click(); return true; }})()",
            scope = js_string(scope),
            text = js_string(text),
        );
        if self.eval_bool("click_link_text", script).await? {
            Ok(())
        } else {
            Err(PortalError::LinkNotFound {
                scope: scope.to_string(),
                text: text.to_string(),
            })
        }
    }

    async fn page_html(&self) -> Result<String, PortalError> {
        self.page
            .content()
            .await
            .map_err(|err| PortalError::protocol("page_html", err))
    }

    async fn set_download_dir_browser(&self, dir: &Path) -> Result<(), PortalError> {
        let params = BrowserDownloadParams::builder()
            .behavior(BrowserDownloadBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .build()
            .map_err(|err| PortalError::protocol("download_setup_browser", err))?;
        let browser = self.browser.lock().await;
        browser
            .execute(params)
            .await
            .map_err(|err| PortalError::protocol("download_setup_browser", err))?;
        Ok(())
    }

    async fn set_download_dir_page(&self, dir: &Path) -> Result<(), PortalError> {
        self.page
            .execute(PageDownloadBehavior::allow(dir))
            .await
            .map_err(|err| PortalError::protocol("download_setup_page", err))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PortalError> {
        let mut browser = self.browser.lock().await;
        let closed = browser
            .close()
            .await
            .map_err(|err| PortalError::protocol("close", err));
        if let Err(err) = browser.wait().await {
            tracing::debug!(error = %err, "browser process did not exit cleanly");
        }
        self.handler.abort();
        if let Err(err) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            tracing::debug!(profile = %self.profile_dir.display(), error = %err, "failed to remove browser profile");
        }
        closed.map(|_| ())
    }
}

/// `Page.setDownloadBehavior`. Deprecated upstream and missing from the
/// generated protocol bindings, but still honoured per target by Chromium.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageDownloadBehavior {
    behavior: &'static str,
    download_path: String,
}

impl PageDownloadBehavior {
    const IDENTIFIER: &'static str = "Page.setDownloadBehavior";

    fn allow(dir: &Path) -> Self {
        Self {
            behavior: "allow",
            download_path: dir.to_string_lossy().into_owned(),
        }
    }
}

impl Method for PageDownloadBehavior {
    fn identifier(&self) -> MethodId {
        Self::IDENTIFIER.into()
    }
}

impl Command for PageDownloadBehavior {
    type Response = serde_json::Value;
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_strings_are_quoted_and_escaped() {
        assert_eq!(js_string("19393"), "\"19393\"");
        assert_eq!(js_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(js_string("पुणे"), "\"पुणे\"");
    }

    #[test]
    fn page_download_command_serializes_for_the_page_domain() {
        let command = PageDownloadBehavior::allow(Path::new("/data/jobs/job-1"));
        assert_eq!(command.identifier(), "Page.setDownloadBehavior");
        assert_eq!(command.domain_name(), "Page");
        assert_eq!(
            serde_json::to_value(&command).expect("json"),
            serde_json::json!({"behavior": "allow", "downloadPath": "/data/jobs/job-1"})
        );
    }

    #[test]
    fn launch_options_default_to_headless_sandboxed() {
        let options = LaunchOptions::builder().build();
        assert!(options.headless);
        assert!(options.sandbox);
        assert!(options.extra_args.is_empty());
        assert_eq!(options.window_size, (1366, 900));
    }
}
