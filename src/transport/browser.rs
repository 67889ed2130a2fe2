//! Session-emulated fetches through a headless Chromium context.
//!
//! Each call launches a fresh browser and tears it down before returning.
//! Isolation over speed: no cookies, cache or rendered state leak between
//! fetches, at the cost of a full browser start per call.

use crate::error::{Result, ScrapeError};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

const CONSENT_BUTTON_SELECTOR: &str = "p.fc-button-label";
const CONSENT_BUTTON_TEXT: &str = "consent";

fn berr(e: impl ToString) -> ScrapeError {
    ScrapeError::Browser(e.to_string())
}

struct BrowserSession {
    browser: Browser,
    driver: JoinHandle<()>,
}

impl BrowserSession {
    async fn open() -> Result<Self> {
        let config = BrowserConfig::builder().build().map_err(berr)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(berr)?;
        let driver = tokio::spawn(async move { while handler.next().await.is_some() {} });
        Ok(Self { browser, driver })
    }

    async fn page(&self, user_agent: &str) -> Result<Page> {
        let page = self.browser.new_page("about:blank").await.map_err(berr)?;
        page.set_user_agent(user_agent).await.map_err(berr)?;
        Ok(page)
    }

    async fn close(mut self) {
        self.browser.close().await.ok();
        self.browser.wait().await.ok();
        self.driver.abort();
    }
}

async fn rendered_content(page: &Page) -> Result<String> {
    page.wait_for_navigation().await.map_err(berr)?;
    page.content().await.map_err(berr)
}

/// Navigate and return the rendered HTML.
pub async fn session_get(url: &str, user_agent: &str) -> Result<String> {
    debug!("browser GET {}", url);
    let session = BrowserSession::open().await?;
    let result = async {
        let page = session.page(user_agent).await?;
        page.goto(url).await.map_err(berr)?;
        rendered_content(&page).await
    }
    .await;
    session.close().await;
    result
}

/// Issue a form-encoded POST from inside a browser context at the page's
/// origin, so the request carries the rendered session's cookies.
pub async fn session_post(
    url: &str,
    payload: Option<&BTreeMap<String, String>>,
    user_agent: &str,
) -> Result<String> {
    debug!("browser POST {}", url);
    let session = BrowserSession::open().await?;
    let result = async {
        let page = session.page(user_agent).await?;
        page.goto(url).await.map_err(berr)?;
        page.wait_for_navigation().await.map_err(berr)?;

        let body = payload
            .map(|fields| {
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish()
            })
            .unwrap_or_default();
        let expression = format!(
            "fetch({url}, {{method: 'POST', headers: {{'Content-Type': \
             'application/x-www-form-urlencoded; charset=UTF-8'}}, body: {body}}})\
             .then(r => r.text())",
            url = serde_json::to_string(url).map_err(berr)?,
            body = serde_json::to_string(&body).map_err(berr)?,
        );
        page.evaluate(expression)
            .await
            .map_err(berr)?
            .into_value::<String>()
            .map_err(berr)
    }
    .await;
    session.close().await;
    result
}

/// Load a page, accept the consent dialog if one is shown, fill the given
/// selector→value form fields, submit with Enter and return the rendered HTML.
pub async fn filter_fetch(
    url: &str,
    fields: Option<&BTreeMap<String, String>>,
    user_agent: &str,
) -> Result<String> {
    debug!("browser filter fetch {}", url);
    let session = BrowserSession::open().await?;
    let result = async {
        let page = session.page(user_agent).await?;
        page.goto(url).await.map_err(berr)?;
        page.wait_for_navigation().await.map_err(berr)?;

        accept_consent(&page).await;

        let mut filled = false;
        if let Some(fields) = fields {
            for (selector, value) in fields {
                if let Ok(element) = page.find_element(selector.as_str()).await {
                    element.click().await.ok();
                    element.type_str(value).await.map_err(berr)?;
                    element.press_key("Enter").await.map_err(berr)?;
                    filled = true;
                }
            }
        }
        if filled {
            // Give the filtered results a moment to render.
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        page.content().await.map_err(berr)
    }
    .await;
    session.close().await;
    result
}

/// Click the consent button when a consent dialog is present. Absence of the
/// dialog is the common case and not an error.
async fn accept_consent(page: &Page) {
    let Ok(candidates) = page.find_elements(CONSENT_BUTTON_SELECTOR).await else {
        return;
    };
    for candidate in candidates {
        let label = candidate.inner_text().await.ok().flatten().unwrap_or_default();
        if label.trim().eq_ignore_ascii_case(CONSENT_BUTTON_TEXT) {
            candidate.click().await.ok();
            return;
        }
    }
}
