//! Headless Chromium session for script-populated forms.
//!
//! Option changes are made in the page itself and the change event is
//! dispatched so the page's own handlers run (classic `__doPostBack` or an
//! AJAX partial update). The session then waits for the document to be
//! complete and no asynchronous postback to be in flight, observed on two
//! consecutive polls.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use regex::Regex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use super::{NavigationSession, SelectOption, SessionError, SettlePolicy, scan_links};
use crate::fetch::{FetchError, FetchedBody, HttpClient, ResourceFetcher};

const SETTLED_SCRIPT: &str = r"(() => {
    if (document.readyState !== 'complete') { return false; }
    const sys = window.Sys;
    const prm = sys && sys.WebForms && sys.WebForms.PageRequestManager
        ? sys.WebForms.PageRequestManager.getInstance()
        : null;
    return !(prm && prm.get_isInAsyncPostBack());
})()";

#[derive(Debug, Deserialize)]
struct OptionsProbe {
    found: bool,
    options: Vec<(String, String)>,
}

/// CDP event loop; aborted when dropped.
struct HandlerTask(JoinHandle<()>);

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A navigation session backed by a headless Chromium instance.
///
/// Binary resources are fetched with the shared HTTP client rather than
/// through the browser.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    _handler: HandlerTask,
    http: HttpClient,
    settle: SettlePolicy,
    current_url: Option<String>,
}

impl BrowserSession {
    /// Launches Chromium and opens a blank page.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Browser`] if Chromium cannot be found or started.
    #[instrument(level = "debug", skip(http))]
    pub async fn launch(http: HttpClient, settle: SettlePolicy) -> Result<Self, SessionError> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(http.timeouts().page)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(|reason| SessionError::Browser { reason })?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::browser(e.to_string()))?;

        let handler = HandlerTask(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        }));

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_error) = shut_down(&mut browser).await {
                    warn!(error = %close_error, "browser did not close after failed launch");
                }
                return Err(SessionError::browser(e.to_string()));
            }
        };
        debug!("browser session launched");

        Ok(Self {
            browser,
            page,
            _handler: handler,
            http,
            settle,
            current_url: None,
        })
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(
        &self,
        script: String,
    ) -> Result<T, SessionError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| SessionError::browser(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| SessionError::browser(e.to_string()))
    }

    async fn wait_for_settle(&mut self, field: &str) -> Result<(), SessionError> {
        let started = Instant::now();
        let mut quiet_polls = 0u8;
        loop {
            tokio::time::sleep(self.settle.poll).await;
            // Evaluation fails while a full postback replaces the document.
            let settled = self
                .evaluate::<bool>(SETTLED_SCRIPT.to_string())
                .await
                .unwrap_or(false);
            quiet_polls = if settled { quiet_polls + 1 } else { 0 };
            if quiet_polls >= 2 {
                break;
            }
            if started.elapsed() >= self.settle.timeout {
                return Err(SessionError::SettleTimeout {
                    field: field.to_string(),
                    waited: started.elapsed(),
                });
            }
        }
        self.current_url = self.page.url().await.ok().flatten();
        trace!(waited_ms = started.elapsed().as_millis(), "page settled");
        Ok(())
    }

    fn url_or_blank(&self) -> String {
        self.current_url.clone().unwrap_or_default()
    }
}

#[async_trait]
impl ResourceFetcher for BrowserSession {
    async fn fetch_binary(&self, url: &str) -> Result<FetchedBody, FetchError> {
        self.http.get_stream(url).await
    }
}

#[async_trait]
impl NavigationSession for BrowserSession {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn load_page(&mut self, url: &str) -> Result<(), SessionError> {
        let timeout = self.http.timeouts().page;
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(SessionError::browser(format!("{url}: {e}"))),
            Err(_) => return Err(FetchError::timeout(url).into()),
        }
        self.wait_for_settle("page").await
    }

    #[instrument(level = "debug", skip(self), fields(field = %field, value = %value))]
    async fn select_option(&mut self, field: &str, value: &str) -> Result<(), SessionError> {
        let script = format!(
            r"(() => {{
    const id = {field};
    const el = document.getElementById(id) || document.getElementsByName(id)[0]
        || [...document.querySelectorAll('select')].find(s => s.id.endsWith('_' + id) || s.name.endsWith('$' + id));
    if (!el) {{ return 'missing'; }}
    if (![...el.options].some(o => o.value === {value})) {{ return 'unknown'; }}
    el.value = {value};
    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    return 'ok';
}})()",
            field = js_string(field),
            value = js_string(value),
        );
        match self.evaluate::<String>(script).await?.as_str() {
            "ok" => self.wait_for_settle(field).await,
            "missing" => Err(SessionError::missing_element(field, self.url_or_blank())),
            _ => Err(SessionError::UnknownOption {
                field: field.to_string(),
                value: value.to_string(),
                url: self.url_or_blank(),
            }),
        }
    }

    async fn query_options(&self, field: &str) -> Result<Vec<SelectOption>, SessionError> {
        let script = format!(
            r"(() => {{
    const id = {field};
    const el = document.getElementById(id) || document.getElementsByName(id)[0]
        || [...document.querySelectorAll('select')].find(s => s.id.endsWith('_' + id) || s.name.endsWith('$' + id));
    if (!el || !el.options) {{ return {{ found: false, options: [] }}; }}
    return {{ found: true, options: [...el.options].map(o => [o.value, o.text.trim()]) }};
}})()",
            field = js_string(field),
        );
        let probe: OptionsProbe = self.evaluate(script).await?;
        if !probe.found {
            return Err(SessionError::missing_element(field, self.url_or_blank()));
        }
        Ok(probe
            .options
            .into_iter()
            .map(|(value, text)| SelectOption { value, text })
            .collect())
    }

    async fn query_link(&self, element_id: &str) -> Result<Option<String>, SessionError> {
        let script = format!(
            r"(() => {{
    const el = document.getElementById({id});
    return el ? (el.getAttribute('href') || '') : '';
}})()",
            id = js_string(element_id),
        );
        let href: String = self.evaluate(script).await?;
        let href = href.trim();
        Ok((!href.is_empty()).then(|| href.to_string()))
    }

    async fn derived_links(&self, pattern: &Regex) -> Result<Vec<String>, SessionError> {
        let markup = self
            .page
            .content()
            .await
            .map_err(|e| SessionError::browser(e.to_string()))?;
        Ok(scan_links(&markup, pattern))
    }

    fn current_url(&self) -> Option<String> {
        self.current_url.clone()
    }

    fn fetcher(&self) -> &dyn ResourceFetcher {
        self
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        let mut this = *self;
        shut_down(&mut this.browser).await?;
        debug!("browser session closed");
        Ok(())
    }
}

/// Closes the browser and reaps its process.
async fn shut_down(browser: &mut Browser) -> Result<(), SessionError> {
    let closed = browser.close().await;
    if let Err(e) = browser.wait().await {
        warn!(error = %e, "browser process did not exit cleanly");
    }
    closed
        .map(|_| ())
        .map_err(|e| SessionError::browser(e.to_string()))
}

/// Quotes `value` as a JavaScript string literal.
fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
