use reqwest::Url;
use serde::{Deserialize, Serialize};

/// How a detail-page URL is reduced to the key the ledger compares on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Canonicalization {
    /// Drop the whole query string and fragment.
    StripQuery,
    /// Keep only the query parameter that identifies the posting.
    KeepParam { name: String },
    /// The query string is the identity (career pages addressing postings by `?idx=`).
    AsIs,
}

impl Default for Canonicalization {
    fn default() -> Self {
        Canonicalization::StripQuery
    }
}

impl Canonicalization {
    pub fn apply(&self, raw: &str) -> String {
        let raw = raw.trim();
        match self {
            Canonicalization::StripQuery => strip_query(raw),
            Canonicalization::AsIs => raw.split('#').next().unwrap_or_default().to_string(),
            Canonicalization::KeepParam { name } => {
                let Ok(mut url) = Url::parse(raw) else {
                    return strip_query(raw);
                };
                let kept = url
                    .query_pairs()
                    .find(|(key, _)| key == name.as_str())
                    .map(|(_, value)| value.into_owned());

                url.set_fragment(None);
                url.set_query(None);
                if let Some(value) = kept {
                    url.query_pairs_mut().append_pair(name, &value);
                }
                url.to_string()
            }
        }
    }
}

fn strip_query(raw: &str) -> String {
    raw.split(['?', '#']).next().unwrap_or_default().to_string()
}

/// Resolves an `href` found on `page_url` into an absolute URL.
pub fn resolve(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    Url::parse(page_url)
        .and_then(|base| base.join(href))
        .ok()
        .map(|url| url.to_string())
}
