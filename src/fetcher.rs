use crate::browser::{PageRenderer, RenderRequest};
use crate::canonical::{self, Canonicalization};
use crate::config::SiteConfig;
use crate::extractor::{parse_selector, visible_text, DetailPlan};
use crate::TrackerError;
use itertools::Itertools;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a site is asked for one company's postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SearchMethod {
    /// Results page addressed by URL; `{query}` is replaced by the company name.
    UrlTemplate { template: String },
    /// Landing page with a search box the query is typed into.
    Input { page: String, input_selector: String },
    /// A single company's career listing; there is nothing to search.
    Listing { url: String },
}

impl SearchMethod {
    pub fn page_url(&self, query: &str) -> String {
        match self {
            SearchMethod::UrlTemplate { template } => template.replace("{query}", query),
            SearchMethod::Input { page, .. } => page.clone(),
            SearchMethod::Listing { url } => url.clone(),
        }
    }
}

/// Where detail links sit on a results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingRules {
    pub ready_selector: Option<String>,
    /// Anchor pointing at a detail page, e.g. `a[href*='/wd/']`.
    pub link_selector: String,
    /// Result card; without one the anchor itself is the card.
    pub card_selector: Option<String>,
    pub company_selector: Option<String>,
    pub title_selector: Option<String>,
    /// Drop results whose displayed company does not contain the target name.
    pub match_company: bool,
    pub scrolls: usize,
}

impl Default for ListingRules {
    fn default() -> Self {
        Self {
            ready_selector: None,
            link_selector: "a".to_string(),
            card_selector: None,
            company_selector: None,
            title_selector: None,
            match_company: true,
            scrolls: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    /// Canonical detail URL.
    pub url: String,
    pub company_text: String,
    pub title: Option<String>,
}

#[derive(Debug)]
pub struct ListingPlan {
    pub rules: ListingRules,
    link: Selector,
    card: Option<Selector>,
    company: Option<Selector>,
    title: Option<Selector>,
}

fn optional_selector(s: &Option<String>) -> Result<Option<Selector>, TrackerError> {
    s.as_deref().map(parse_selector).transpose()
}

fn one_line(el: ElementRef<'_>) -> String {
    visible_text(el).lines().map(str::trim).join(" ")
}

impl ListingPlan {
    pub fn compile(rules: &ListingRules) -> Result<Self, TrackerError> {
        Ok(Self {
            rules: rules.clone(),
            link: parse_selector(&rules.link_selector)?,
            card: optional_selector(&rules.card_selector)?,
            company: optional_selector(&rules.company_selector)?,
            title: optional_selector(&rules.title_selector)?,
        })
    }

    /// Detail links on a results page that belong to `target`, canonicalized and
    /// deduplicated with the first occurrence kept.
    pub fn collect_links(
        &self,
        html: &str,
        page_url: &str,
        target: &str,
        canonicalization: &Canonicalization,
    ) -> Vec<CandidateLink> {
        let doc = Html::parse_document(html);

        let found: Vec<(&str, String, Option<String>)> = match &self.card {
            Some(card) => doc
                .select(card)
                .filter_map(|card| {
                    let link = card.select(&self.link).next()?;
                    let href = link.value().attr("href")?;
                    let company = self
                        .company
                        .as_ref()
                        .and_then(|s| card.select(s).next())
                        .map(one_line)
                        .unwrap_or_else(|| one_line(card));
                    let title = self
                        .title
                        .as_ref()
                        .and_then(|s| card.select(s).next())
                        .map(one_line)
                        .or_else(|| link.value().attr("title").map(ToString::to_string))
                        .or_else(|| Some(one_line(link)));
                    Some((href, company, title))
                })
                .collect(),
            None => doc
                .select(&self.link)
                .filter_map(|a| {
                    let href = a.value().attr("href")?;
                    let text = one_line(a);
                    Some((href, text.clone(), Some(text)))
                })
                .collect(),
        };

        found
            .into_iter()
            .filter_map(|(href, company_text, title)| {
                let url = canonical::resolve(page_url, href)?;
                Some(CandidateLink {
                    url: canonicalization.apply(&url),
                    company_text: company_text.trim().to_string(),
                    title: title.filter(|t| !t.trim().is_empty()),
                })
            })
            .filter(|link| !self.rules.match_company || link.company_text.contains(target))
            .unique_by(|link| link.url.clone())
            .collect()
    }
}

/// Compiled selectors for one site.
#[derive(Debug)]
pub struct SitePlan {
    pub listing: ListingPlan,
    pub detail: DetailPlan,
}

impl SitePlan {
    pub fn compile(site: &SiteConfig) -> Result<Self, TrackerError> {
        Ok(Self {
            listing: ListingPlan::compile(&site.listing)?,
            detail: DetailPlan::compile(&site.detail)?,
        })
    }
}

/// Loads the results page for one company and returns its HTML.
pub async fn load_results<R>(
    renderer: &R,
    site: &SiteConfig,
    query: &str,
) -> Result<String, TrackerError>
where
    R: PageRenderer + ?Sized,
{
    let url = site.search.page_url(query);
    let req = RenderRequest {
        url: &url,
        ready_selector: site.listing.ready_selector.as_deref(),
        scrolls: site.listing.scrolls,
        settle: Duration::from_millis(site.settle_ms),
    };
    match &site.search {
        SearchMethod::Input { input_selector, .. } => {
            renderer.search_input(&req, input_selector, query).await
        }
        SearchMethod::UrlTemplate { .. } | SearchMethod::Listing { .. } => {
            renderer.render(&req).await
        }
    }
}
