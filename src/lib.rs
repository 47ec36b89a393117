use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod browser;
pub mod canonical;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod ledger;
pub mod notifier;
pub mod page;
pub mod posting;
pub mod summarize;

mod error;
mod utils;

pub use error::TrackerError;
pub use utils::today;

use browser::{PageRenderer, RenderRequest};
use config::SiteConfig;
use fetcher::{load_results, CandidateLink, SitePlan};
use ledger::{Ledger, Upsert};
use posting::Posting;

/// What one pass over a site did to its ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub reactivated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub expired: usize,
    /// Every company search succeeded.
    pub complete: bool,
}

/// Scans every target company of `site` and folds the results into `ledger`.
///
/// Companies and postings are processed one at a time. A posting whose detail page
/// fails to load is skipped but still counts as seen; a company whose search fails
/// leaves the run incomplete, and an incomplete run expires nothing.
pub async fn run_site<R>(
    site: &SiteConfig,
    renderer: &R,
    ledger: &mut Ledger,
    today: &str,
) -> Result<ScanReport, TrackerError>
where
    R: PageRenderer + ?Sized,
{
    let plan = SitePlan::compile(site)?;
    let mut report = ScanReport {
        complete: true,
        ..Default::default()
    };
    let mut seen = HashSet::new();

    for company in &site.companies {
        info!("[{}] Search {}", site.name, company);

        let results_url = site.search.page_url(company);
        let html = match load_results(renderer, site, company).await {
            Ok(html) => html,
            Err(e) => {
                error!("[{}] Search for {} failed: {:?}", site.name, company, e);
                report.complete = false;
                continue;
            }
        };

        let links = plan
            .listing
            .collect_links(&html, &results_url, company, &site.canonicalization);
        info!("[{}] {}: {} postings listed", site.name, company, links.len());

        for link in links {
            if !seen.insert(link.url.clone()) {
                continue;
            }
            if ledger.has_body(&link.url, site.skip_body_threshold) {
                if ledger.reactivate(&link.url) {
                    info!("[{}] Reopened posting {}", site.name, link.url);
                    report.reactivated += 1;
                } else {
                    debug!("Skip {}, body already stored", link.url);
                    report.skipped += 1;
                }
                continue;
            }

            match capture(site, &plan, renderer, company, &link).await {
                Ok(posting) => match ledger.upsert(posting, today) {
                    Upsert::Inserted => {
                        info!("[{}] New posting {}", site.name, link.url);
                        report.inserted += 1;
                    }
                    Upsert::Updated => report.updated += 1,
                    Upsert::Reactivated => {
                        info!("[{}] Reopened posting {}", site.name, link.url);
                        report.reactivated += 1;
                    }
                },
                Err(e) => {
                    warn!("[{}] Detail {} failed: {:?}", site.name, link.url, e);
                    report.failed += 1;
                }
            }
        }
    }

    report.seen = seen.len();
    if !report.complete {
        warn!("[{}] Incomplete scan, nothing is marked completed", site.name);
    } else if seen.is_empty() {
        warn!("[{}] No postings found, nothing is marked completed", site.name);
    } else {
        report.expired = ledger.mark_completed_scoped(&seen, today, &site.companies);
    }

    info!("[{}] {:?}", site.name, report);
    Ok(report)
}

async fn capture<R>(
    site: &SiteConfig,
    plan: &SitePlan,
    renderer: &R,
    company: &str,
    link: &CandidateLink,
) -> Result<Posting, TrackerError>
where
    R: PageRenderer + ?Sized,
{
    let settle = Duration::from_millis(site.settle_ms);
    let html = renderer
        .render(&RenderRequest {
            url: &link.url,
            ready_selector: site.detail.ready_selector.as_deref(),
            scrolls: 0,
            settle,
        })
        .await?;

    let frame = match plan.detail.frame_src(&html, &link.url) {
        Some(src) => {
            let req = RenderRequest {
                url: &src,
                ready_selector: None,
                scrolls: 0,
                settle,
            };
            match renderer.render(&req).await {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!("Frame {} failed: {:?}", src, e);
                    None
                }
            }
        }
        None => None,
    };

    let extracted = extractor::extract(
        &html,
        frame.as_deref(),
        &link.url,
        &plan.detail,
        link.title.as_deref(),
    );

    let posting = Posting {
        company: company.to_string(),
        title: extracted.title,
        experience: extracted.experience.to_string(),
        body: extracted.body,
        images: extracted.images,
        url: link.url.clone(),
        first_seen: String::new(),
        completed_date: String::new(),
    };
    debug!("\n{}", posting);
    Ok(posting)
}
