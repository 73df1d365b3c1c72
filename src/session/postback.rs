//! Form-interaction session over plain HTTP postbacks.
//!
//! Selecting an option in a server-driven cascading form submits the whole
//! form back to the server with `__EVENTTARGET` naming the changed field; the
//! response is the re-rendered page with the dependent list repopulated.
//! [`PostbackSession`] performs exactly that exchange, so the update has
//! settled as soon as the response body has arrived.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, trace};
use url::Url;

use super::{NavigationSession, SelectOption, SessionError, scan_links};
use crate::fetch::{FetchError, FetchedBody, HttpClient, ResourceFetcher};

const EVENT_TARGET: &str = "__EVENTTARGET";
const EVENT_ARGUMENT: &str = "__EVENTARGUMENT";

#[derive(Debug, Clone)]
struct LoadedPage {
    url: String,
    html: String,
}

/// A navigation session that replays form postbacks with the shared client.
#[derive(Debug)]
pub struct PostbackSession {
    client: HttpClient,
    page: Option<LoadedPage>,
}

impl PostbackSession {
    /// Creates a session using `client` for pages, postbacks and binaries.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client, page: None }
    }

    fn page(&self) -> Result<&LoadedPage, SessionError> {
        self.page.as_ref().ok_or(SessionError::NoPage)
    }
}

#[async_trait]
impl ResourceFetcher for PostbackSession {
    async fn fetch_binary(&self, url: &str) -> Result<FetchedBody, FetchError> {
        self.client.get_stream(url).await
    }
}

#[async_trait]
impl NavigationSession for PostbackSession {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn load_page(&mut self, url: &str) -> Result<(), SessionError> {
        let response = self.client.get_text(url).await?;
        self.page = Some(LoadedPage {
            url: response.url,
            html: response.body,
        });
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(field = %field, value = %value))]
    async fn select_option(&mut self, field: &str, value: &str) -> Result<(), SessionError> {
        let page = self.page()?;
        let postback = build_postback(&page.html, &page.url, field, value)?;
        debug!(action = %postback.action, fields = postback.fields.len(), "submitting postback");

        let response = self
            .client
            .post_form(&postback.action, &postback.fields)
            .await?;
        self.page = Some(LoadedPage {
            url: response.url,
            html: response.body,
        });
        Ok(())
    }

    async fn query_options(&self, field: &str) -> Result<Vec<SelectOption>, SessionError> {
        let page = self.page()?;
        let document = Html::parse_document(&page.html);
        let select = find_select(&document, field)
            .ok_or_else(|| SessionError::missing_element(field, &page.url))?;
        Ok(select_options(select))
    }

    async fn query_link(&self, element_id: &str) -> Result<Option<String>, SessionError> {
        let page = self.page()?;
        Ok(link_by_id(&page.html, element_id))
    }

    async fn derived_links(&self, pattern: &Regex) -> Result<Vec<String>, SessionError> {
        let page = self.page()?;
        Ok(scan_links(&page.html, pattern))
    }

    fn current_url(&self) -> Option<String> {
        self.page.as_ref().map(|page| page.url.clone())
    }

    fn fetcher(&self) -> &dyn ResourceFetcher {
        self
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        trace!("postback session closed");
        Ok(())
    }
}

/// A ready-to-send form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Postback {
    action: String,
    fields: Vec<(String, String)>,
}

/// Serializes the page's form with `field` set to `value` and the event
/// target pointing at `field`.
fn build_postback(
    html: &str,
    page_url: &str,
    field: &str,
    value: &str,
) -> Result<Postback, SessionError> {
    let document = Html::parse_document(html);

    let select = find_select(&document, field)
        .ok_or_else(|| SessionError::missing_element(field, page_url))?;
    let Some(target_name) = select.value().attr("name").map(str::to_string) else {
        return Err(SessionError::missing_element(
            format!("name attribute of {field}"),
            page_url,
        ));
    };
    if !select_options(select).iter().any(|o| o.value == value) {
        return Err(SessionError::UnknownOption {
            field: field.to_string(),
            value: value.to_string(),
            url: page_url.to_string(),
        });
    }

    let form = select
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
        .ok_or_else(|| SessionError::missing_element("form", page_url))?;

    let action = resolve_action(page_url, form.value().attr("action"))?;

    let mut fields = form_fields(form);
    fields.retain(|(name, _)| name != EVENT_TARGET && name != EVENT_ARGUMENT);
    match fields.iter_mut().find(|(name, _)| *name == target_name) {
        Some(entry) => entry.1 = value.to_string(),
        None => fields.push((target_name.clone(), value.to_string())),
    }
    fields.insert(0, (EVENT_ARGUMENT.to_string(), String::new()));
    fields.insert(0, (EVENT_TARGET.to_string(), target_name));

    Ok(Postback { action, fields })
}

fn resolve_action(page_url: &str, action: Option<&str>) -> Result<String, SessionError> {
    let base = Url::parse(page_url).map_err(|_| FetchError::invalid_url(page_url))?;
    match action.map(str::trim).filter(|a| !a.is_empty()) {
        Some(action) => base
            .join(action)
            .map(String::from)
            .map_err(|_| SessionError::Fetch(FetchError::invalid_url(action))),
        None => Ok(base.into()),
    }
}

/// Collects the successful controls of `form` in document order.
fn form_fields(form: ElementRef<'_>) -> Vec<(String, String)> {
    let Ok(controls) = Selector::parse("input[name], select[name], textarea[name]") else {
        return Vec::new();
    };
    let mut fields = Vec::new();
    for control in form.select(&controls) {
        let element = control.value();
        let Some(name) = element.attr("name") else {
            continue;
        };
        if element.attr("disabled").is_some() {
            continue;
        }
        match element.name() {
            "input" => {
                let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => {}
                    "checkbox" | "radio" => {
                        if element.attr("checked").is_some() {
                            let value = element.attr("value").unwrap_or("on");
                            fields.push((name.to_string(), value.to_string()));
                        }
                    }
                    _ => fields.push((
                        name.to_string(),
                        element.attr("value").unwrap_or_default().to_string(),
                    )),
                }
            }
            "select" => {
                if let Some(selected) = selected_value(control) {
                    fields.push((name.to_string(), selected));
                }
            }
            _ => fields.push((name.to_string(), control.text().collect())),
        }
    }
    fields
}

/// Finds a `<select>` by exact id, then exact name, then by the suffix that
/// naming containers leave intact (`ctl00_Main_ddlDistrict`,
/// `ctl00$Main$ddlDistrict`).
fn find_select<'a>(document: &'a Html, field: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse("select").ok()?;
    let id_suffix = format!("_{field}");
    let name_suffix = format!("${field}");
    let mut by_name = None;
    let mut by_suffix = None;
    for select in document.select(&selector) {
        let id = select.value().id();
        let name = select.value().attr("name");
        if id == Some(field) {
            return Some(select);
        }
        if by_name.is_none() && name == Some(field) {
            by_name = Some(select);
        }
        if by_suffix.is_none()
            && (id.is_some_and(|id| id.ends_with(&id_suffix))
                || name.is_some_and(|name| name.ends_with(&name_suffix)))
        {
            by_suffix = Some(select);
        }
    }
    by_name.or(by_suffix)
}

fn option_entries(select: ElementRef<'_>) -> Vec<(SelectOption, bool)> {
    let Ok(selector) = Selector::parse("option") else {
        return Vec::new();
    };
    select
        .select(&selector)
        .map(|option| {
            let text = option.text().collect::<String>().trim().to_string();
            let value = option
                .value()
                .attr("value")
                .map_or_else(|| text.clone(), str::to_string);
            let selected = option.value().attr("selected").is_some();
            (SelectOption { value, text }, selected)
        })
        .collect()
}

fn select_options(select: ElementRef<'_>) -> Vec<SelectOption> {
    option_entries(select)
        .into_iter()
        .map(|(option, _)| option)
        .collect()
}

fn selected_value(select: ElementRef<'_>) -> Option<String> {
    let entries = option_entries(select);
    entries
        .iter()
        .find(|(_, selected)| *selected)
        .or_else(|| entries.first())
        .map(|(option, _)| option.value.clone())
}

fn link_by_id(html: &str, element_id: &str) -> Option<String> {
    let selector = Selector::parse("[id]").ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .find(|el| el.value().id() == Some(element_id))
        .and_then(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}
