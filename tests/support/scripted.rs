//! In-memory cascading form for traversal tests.
//!
//! [`ScriptedSite`] describes districts, upazilas and the links each upazila
//! reveals. [`ScriptedSession`] plays it back through the
//! [`NavigationSession`] trait and records every call in a shared [`Journal`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mapcrawl_core::fetch::{FetchError, FetchedBody, ResourceFetcher};
use mapcrawl_core::session::{NavigationSession, SelectOption, SessionError, scan_links};
use regex::Regex;

pub const PAGE_URL: &str = "http://maps.example.gov.bd/Maps/Maps.aspx";
pub const DISTRICT_FIELD: &str = "ddlDistrict";
pub const UPAZILA_FIELD: &str = "ddlUpazila";

#[derive(Debug, Clone)]
pub struct ScriptedUpazila {
    pub value: String,
    pub text: String,
    /// Hrefs embedded in the rendered markup after selection.
    pub links: Vec<String>,
    /// `(element id, href)` pairs exposed to `query_link`.
    pub anchors: Vec<(String, String)>,
}

impl ScriptedUpazila {
    pub fn new(value: &str, text: &str, links: &[&str]) -> Self {
        Self {
            value: value.to_string(),
            text: text.to_string(),
            links: links.iter().map(ToString::to_string).collect(),
            anchors: Vec::new(),
        }
    }

    pub fn with_anchor(mut self, id: &str, href: &str) -> Self {
        self.anchors.push((id.to_string(), href.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedDistrict {
    pub value: String,
    pub text: String,
    pub upazilas: Vec<ScriptedUpazila>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSite {
    pub districts: Vec<ScriptedDistrict>,
    /// Resource bodies by absolute URL. Absent URLs answer 404.
    pub resources: HashMap<String, Vec<u8>>,
    /// Upazila values whose selection fails and drops the form state.
    pub failing_upazilas: HashSet<String>,
    /// When set, the start page itself fails to load.
    pub page_down: bool,
}

impl ScriptedSite {
    pub fn district(mut self, value: &str, text: &str, upazilas: Vec<ScriptedUpazila>) -> Self {
        self.districts.push(ScriptedDistrict {
            value: value.to_string(),
            text: text.to_string(),
            upazilas,
        });
        self
    }

    pub fn resource(mut self, url: &str, body: &[u8]) -> Self {
        self.resources.insert(url.to_string(), body.to_vec());
        self
    }

    pub fn failing_upazila(mut self, value: &str) -> Self {
        self.failing_upazilas.insert(value.to_string());
        self
    }
}

/// Calls observed by a scripted session.
#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
    fetched: Mutex<Vec<String>>,
}

impl Journal {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

pub struct ScriptedSession {
    site: Arc<ScriptedSite>,
    journal: Arc<Journal>,
    loaded: bool,
    district: Option<usize>,
    upazila: Option<usize>,
}

impl ScriptedSession {
    pub fn new(site: Arc<ScriptedSite>, journal: Arc<Journal>) -> Self {
        Self {
            site,
            journal,
            loaded: false,
            district: None,
            upazila: None,
        }
    }

    fn current_district(&self) -> Option<&ScriptedDistrict> {
        self.district.map(|index| &self.site.districts[index])
    }

    fn current_upazila(&self) -> Option<&ScriptedUpazila> {
        let district = self.current_district()?;
        self.upazila.map(|index| &district.upazilas[index])
    }

    fn unknown(field: &str, value: &str) -> SessionError {
        SessionError::UnknownOption {
            field: field.to_string(),
            value: value.to_string(),
            url: PAGE_URL.to_string(),
        }
    }
}

fn with_placeholder(label: &str, options: impl Iterator<Item = SelectOption>) -> Vec<SelectOption> {
    std::iter::once(SelectOption::new("0", format!("--Select {label}--")))
        .chain(options)
        .collect()
}

#[async_trait]
impl ResourceFetcher for ScriptedSession {
    async fn fetch_binary(&self, url: &str) -> Result<FetchedBody, FetchError> {
        self.journal.fetched.lock().unwrap().push(url.to_string());
        match self.site.resources.get(url) {
            Some(body) => Ok(FetchedBody::from_bytes(200, body.clone())),
            None => Err(FetchError::http_status(url, 404)),
        }
    }
}

#[async_trait]
impl NavigationSession for ScriptedSession {
    async fn load_page(&mut self, url: &str) -> Result<(), SessionError> {
        self.journal.record("load".to_string());
        if self.site.page_down || url != PAGE_URL {
            return Err(FetchError::http_status(url, 503).into());
        }
        self.loaded = true;
        self.district = None;
        self.upazila = None;
        Ok(())
    }

    async fn select_option(&mut self, field: &str, value: &str) -> Result<(), SessionError> {
        self.journal.record(format!("select {field}={value}"));
        if !self.loaded {
            return Err(SessionError::NoPage);
        }
        match field {
            DISTRICT_FIELD => {
                let index = self
                    .site
                    .districts
                    .iter()
                    .position(|d| d.value == value)
                    .ok_or_else(|| Self::unknown(field, value))?;
                self.district = Some(index);
                self.upazila = None;
                Ok(())
            }
            UPAZILA_FIELD => {
                let district = self
                    .current_district()
                    .ok_or_else(|| Self::unknown(field, value))?;
                let index = district
                    .upazilas
                    .iter()
                    .position(|u| u.value == value)
                    .ok_or_else(|| Self::unknown(field, value))?;
                if self.site.failing_upazilas.contains(value) {
                    self.district = None;
                    self.upazila = None;
                    return Err(SessionError::SettleTimeout {
                        field: field.to_string(),
                        waited: Duration::from_secs(20),
                    });
                }
                self.upazila = Some(index);
                Ok(())
            }
            _ => Err(SessionError::missing_element(field, PAGE_URL)),
        }
    }

    async fn query_options(&self, field: &str) -> Result<Vec<SelectOption>, SessionError> {
        if !self.loaded {
            return Err(SessionError::NoPage);
        }
        match field {
            DISTRICT_FIELD => Ok(with_placeholder(
                "District",
                self.site
                    .districts
                    .iter()
                    .map(|d| SelectOption::new(d.value.as_str(), d.text.as_str())),
            )),
            UPAZILA_FIELD => Ok(with_placeholder(
                "Upazila",
                self.current_district()
                    .into_iter()
                    .flat_map(|d| d.upazilas.iter())
                    .map(|u| SelectOption::new(u.value.as_str(), u.text.as_str())),
            )),
            _ => Err(SessionError::missing_element(field, PAGE_URL)),
        }
    }

    async fn query_link(&self, element_id: &str) -> Result<Option<String>, SessionError> {
        Ok(self.current_upazila().and_then(|u| {
            u.anchors
                .iter()
                .find(|(id, _)| id == element_id)
                .map(|(_, href)| href.clone())
        }))
    }

    async fn derived_links(&self, pattern: &Regex) -> Result<Vec<String>, SessionError> {
        let markup: String = self
            .current_upazila()
            .map(|u| {
                u.links
                    .iter()
                    .map(|href| format!("<a href=\"{href}\">map</a>\n"))
                    .collect()
            })
            .unwrap_or_default();
        Ok(scan_links(&markup, pattern))
    }

    fn current_url(&self) -> Option<String> {
        self.loaded.then(|| PAGE_URL.to_string())
    }

    fn fetcher(&self) -> &dyn ResourceFetcher {
        self
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.journal.record("close".to_string());
        Ok(())
    }
}
