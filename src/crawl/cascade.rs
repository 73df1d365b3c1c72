//! Cascading-selection traversal: district × upazila through a stateful form.

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use super::{CrawlContext, CrawlError, CrawlSummary, Traverser};
use crate::href::{is_directory, normalize_href};
use crate::naming::TraversalPath;
use crate::session::{NavigationSession, SelectOption, SessionError};

/// Where the form lives and how to read it.
#[derive(Debug, Clone)]
pub struct CascadeSettings {
    /// Page hosting the cascading form.
    pub page_url: String,
    /// Id or name of the district `<select>`.
    pub district_field: String,
    /// Id or name of the upazila `<select>`.
    pub upazila_field: String,
    /// Pattern for resource links in the rendered markup.
    pub link_pattern: Regex,
    /// Ids of anchors whose `href` is also a resource link.
    pub link_element_ids: Vec<String>,
    /// Path of the resource root on the page's host, e.g. `UploadedDocument`.
    pub resource_root: String,
}

/// Walks every district and upazila offered by the form.
///
/// Owns the navigation session for the duration of the run and closes it on
/// every exit path.
pub struct CascadeTraverser {
    session: Box<dyn NavigationSession>,
    settings: CascadeSettings,
}

impl CascadeTraverser {
    /// Creates a traverser over `session`.
    #[must_use]
    pub fn new(session: Box<dyn NavigationSession>, settings: CascadeSettings) -> Self {
        Self { session, settings }
    }
}

#[async_trait]
impl Traverser for CascadeTraverser {
    #[instrument(skip_all, name = "cascade")]
    async fn run(self: Box<Self>, ctx: &CrawlContext) -> Result<CrawlSummary, CrawlError> {
        let Self {
            mut session,
            settings,
        } = *self;
        info!(page = %settings.page_url, "starting cascade traversal");

        let outcome = Walk {
            session: session.as_mut(),
            settings: &settings,
            ctx,
        }
        .run()
        .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close navigation session");
        }
        outcome.map(|()| ctx.stats.summary())
    }
}

struct Walk<'a> {
    session: &'a mut dyn NavigationSession,
    settings: &'a CascadeSettings,
    ctx: &'a CrawlContext,
}

impl Walk<'_> {
    async fn run(&mut self) -> Result<(), CrawlError> {
        let page_url = self.settings.page_url.clone();
        self.session.load_page(&page_url).await?;

        let districts = self
            .session
            .query_options(&self.settings.district_field)
            .await
            .map_err(|e| CrawlError::discovery(&page_url, e.to_string()))?;
        let districts = traversable(districts);
        if districts.is_empty() {
            return Err(CrawlError::discovery(&page_url, "no districts offered"));
        }
        info!(count = districts.len(), "districts discovered");

        for district in &districts {
            if self.ctx.should_stop() {
                break;
            }
            self.visit_district(district).await;
            if !self.ctx.pause(self.ctx.pacing.district_delay).await {
                break;
            }
        }
        Ok(())
    }

    async fn visit_district(&mut self, district: &SelectOption) {
        info!(district = %district.text, value = %district.value, "entering district");

        if let Err(e) = self.select_district(district).await {
            log_transition_failure(&e, &district.text, "district selection failed; skipping district");
            self.ctx.stats.record_branch_skipped();
            return;
        }

        let upazilas = match self.session.query_options(&self.settings.upazila_field).await {
            Ok(options) => traversable(options),
            Err(e) => {
                log_transition_failure(&e, &district.text, "upazila list unreadable; skipping district");
                self.ctx.stats.record_branch_skipped();
                return;
            }
        };
        if upazilas.is_empty() {
            warn!(district = %district.text, "no upazilas offered; skipping district");
            self.ctx.stats.record_branch_skipped();
            return;
        }
        debug!(district = %district.text, count = upazilas.len(), "upazilas discovered");

        let path = TraversalPath::root().child(district.text.as_str());
        let mut needs_resync = false;
        for upazila in &upazilas {
            if self.ctx.should_stop() {
                return;
            }
            if needs_resync {
                if let Err(e) = self.resync(district).await {
                    log_transition_failure(
                        &e,
                        &district.text,
                        "cannot re-synchronize form; skipping rest of district",
                    );
                    self.ctx.stats.record_branch_skipped();
                    return;
                }
                needs_resync = false;
            }

            info!(district = %district.text, upazila = %upazila.text, "entering upazila");
            match self
                .session
                .select_option(&self.settings.upazila_field, &upazila.value)
                .await
            {
                Ok(()) => self.visit_leaf(&path.child(upazila.text.as_str())).await,
                Err(e) => {
                    log_transition_failure(&e, &upazila.text, "upazila selection failed; skipping upazila");
                    self.ctx.stats.record_branch_skipped();
                    needs_resync = true;
                }
            }

            if !self.ctx.pause(self.ctx.pacing.leaf_delay).await {
                return;
            }
        }
    }

    async fn select_district(&mut self, district: &SelectOption) -> Result<(), SessionError> {
        self.session
            .select_option(&self.settings.district_field, &district.value)
            .await
    }

    /// Reloads the form and re-selects `district` after a failed transition.
    async fn resync(&mut self, district: &SelectOption) -> Result<(), SessionError> {
        debug!(district = %district.text, "re-synchronizing form state");
        let page_url = self.settings.page_url.clone();
        self.session.load_page(&page_url).await?;
        self.select_district(district).await
    }

    async fn visit_leaf(&mut self, leaf: &TraversalPath) {
        let label = leaf.leaf().unwrap_or_default();
        let page_url = self
            .session
            .current_url()
            .unwrap_or_else(|| self.settings.page_url.clone());
        let Ok(base) = Url::parse(&page_url) else {
            error!(url = %page_url, "current page URL is invalid; skipping upazila");
            self.ctx.stats.record_failed();
            return;
        };
        let Ok(resource_base) = base.join(&format!(
            "/{}/",
            self.settings.resource_root.trim_matches('/')
        )) else {
            error!(url = %page_url, root = %self.settings.resource_root, "cannot resolve resource root");
            self.ctx.stats.record_failed();
            return;
        };

        let hrefs = match self.collect_hrefs().await {
            Ok(hrefs) => hrefs,
            Err(e) => {
                error!(url = %page_url, upazila = %label, error = %e, "cannot read derived links");
                self.ctx.stats.record_failed();
                return;
            }
        };

        let candidates: Vec<String> = hrefs
            .iter()
            .filter_map(|href| base.join(href.trim()).ok())
            .filter_map(|url| normalize_href(url.as_str(), &self.settings.resource_root))
            .filter(|path| !is_directory(path))
            .collect();
        trace!(hrefs = hrefs.len(), candidates = candidates.len(), "links normalized");

        let classification = self.ctx.classifier.classify(&candidates, label);
        if classification.is_empty() {
            warn!(leaf = %leaf, url = %page_url, "no map links found");
            self.ctx.stats.record_soft_miss();
            return;
        }
        if classification.fallback_used {
            warn!(
                leaf = %leaf,
                candidates = classification.len(),
                "no link mentions the upazila; downloading every candidate as primary"
            );
        }

        let tasks = self
            .ctx
            .naming
            .plan_tasks(leaf, &classification, &resource_base);
        for task in &tasks {
            if self.ctx.should_stop() {
                return;
            }
            self.ctx.deliver(task, self.session.fetcher()).await;
        }
    }

    async fn collect_hrefs(&self) -> Result<Vec<String>, SessionError> {
        let mut hrefs = self
            .session
            .derived_links(&self.settings.link_pattern)
            .await?;
        for id in &self.settings.link_element_ids {
            match self.session.query_link(id).await {
                Ok(Some(href)) => hrefs.push(href),
                Ok(None) => trace!(element = %id, "link element absent"),
                Err(e) => debug!(element = %id, error = %e, "link element query failed"),
            }
        }
        Ok(hrefs)
    }
}

/// Drops placeholder entries.
fn traversable(options: Vec<SelectOption>) -> Vec<SelectOption> {
    options
        .into_iter()
        .filter(|option| !option.is_placeholder())
        .collect()
}

fn log_transition_failure(error: &SessionError, label: &str, message: &str) {
    match error {
        SessionError::Fetch(e) => {
            error!(
                node = %label,
                url = e.url().unwrap_or_default(),
                error = %e,
                "{message}"
            );
        }
        other => warn!(node = %label, error = %other, "{message}"),
    }
}
