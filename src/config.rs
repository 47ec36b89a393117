use crate::canonical::Canonicalization;
use crate::extractor::{DetailRules, SectionRule};
use crate::fetcher::{ListingRules, SearchMethod};
use crate::posting::ColumnSchema;
use crate::TrackerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const WEBHOOK_ENV: &str = "SLACK_WEBHOOK_URL";
pub const SUMMARY_KEY_ENV: &str = "OPENAI_API_KEY";

const COMPANIES: [&str; 7] = [
    "대영채비",
    "이브이시스",
    "플러그링크",
    "볼트업",
    "차지비",
    "에버온",
    "일렉링크",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserSettings,
    pub sites: Vec<SiteConfig>,
    pub notify: NotifyConfig,
    pub page: PageConfig,
}

impl Default for Config {
    fn default() -> Self {
        let sites = SiteConfig::defaults();
        Self {
            browser: BrowserSettings::default(),
            notify: NotifyConfig::for_sites(&sites),
            page: PageConfig::default(),
            sites,
        }
    }
}

impl Config {
    /// Reads a JSON config, or the built-in site list when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, TrackerError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&text)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn site(&self, name: &str) -> Result<&SiteConfig, TrackerError> {
        self.sites
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| TrackerError::UnknownSite(name.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub user_agent: String,
    pub wait_timeout_secs: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            user_agent: crate::browser::DEFAULT_USER_AGENT.to_string(),
            wait_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    Browser,
    Http,
}

fn default_renderer() -> RendererKind {
    RendererKind::Browser
}

fn default_skip_threshold() -> usize {
    50
}

fn default_settle_ms() -> u64 {
    2000
}

/// Everything that differs between two recruiting sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub display_name: String,
    pub csv_path: PathBuf,
    pub companies: Vec<String>,
    pub search: SearchMethod,
    #[serde(default)]
    pub listing: ListingRules,
    #[serde(default)]
    pub detail: DetailRules,
    #[serde(default)]
    pub canonicalization: Canonicalization,
    #[serde(default)]
    pub columns: ColumnSchema,
    #[serde(default = "default_renderer")]
    pub renderer: RendererKind,
    /// Stored bodies longer than this are not fetched again.
    #[serde(default = "default_skip_threshold")]
    pub skip_body_threshold: usize,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl SiteConfig {
    pub fn defaults() -> Vec<SiteConfig> {
        vec![
            Self::wanted(),
            Self::remember(),
            Self::saramin(),
            Self::water(),
            Self::bep(),
        ]
    }

    pub fn wanted() -> Self {
        Self {
            name: "wanted".to_string(),
            display_name: "원티드(Wanted)".to_string(),
            csv_path: PathBuf::from("wanted_results.csv"),
            companies: strings(&COMPANIES),
            search: SearchMethod::UrlTemplate {
                template: "https://www.wanted.co.kr/search?query={query}&tab=position"
                    .to_string(),
            },
            listing: ListingRules {
                link_selector: "a[href*='/wd/']".to_string(),
                ..Default::default()
            },
            detail: DetailRules {
                section_keywords: strings(&["주요업무", "주요 업무", "자격요건", "자격 요건", "포지션 상세"]),
                heading_tags: strings(&["h2", "h3", "h4", "h5", "h6", "strong", "span"]),
                fallback_selectors: strings(&["div[class*='JobContent_description']"]),
                ..Default::default()
            },
            canonicalization: Canonicalization::StripQuery,
            columns: ColumnSchema::default(),
            renderer: RendererKind::Browser,
            skip_body_threshold: default_skip_threshold(),
            settle_ms: 3000,
        }
    }

    pub fn remember() -> Self {
        Self {
            name: "remember".to_string(),
            display_name: "리멤버(Remember)".to_string(),
            csv_path: PathBuf::from("remember_results.csv"),
            companies: strings(&COMPANIES),
            search: SearchMethod::Input {
                page: "https://career.rememberapp.co.kr/job/postings".to_string(),
                input_selector: "input[placeholder*='검색']".to_string(),
            },
            listing: ListingRules {
                ready_selector: Some("a[href*='/job/posting/']".to_string()),
                link_selector: "a[href*='/job/posting/']".to_string(),
                scrolls: 5,
                ..Default::default()
            },
            detail: DetailRules {
                section_keywords: strings(&["주요업무", "주요 업무", "담당업무", "자격요건", "포지션 상세"]),
                max_ancestors: 8,
                container_stop_len: 200,
                experience_header_levels: 0,
                ..Default::default()
            },
            canonicalization: Canonicalization::StripQuery,
            columns: ColumnSchema::default(),
            renderer: RendererKind::Browser,
            skip_body_threshold: default_skip_threshold(),
            settle_ms: 2000,
        }
    }

    pub fn saramin() -> Self {
        Self {
            name: "saramin".to_string(),
            display_name: "사람인(Saramin)".to_string(),
            csv_path: PathBuf::from("saramin_results.csv"),
            companies: strings(&COMPANIES[..6]),
            search: SearchMethod::UrlTemplate {
                template: "https://www.saramin.co.kr/zf_user/search/recruit?searchword={query}"
                    .to_string(),
            },
            listing: ListingRules {
                ready_selector: Some("#recruit_info_list".to_string()),
                card_selector: Some(".item_recruit".to_string()),
                link_selector: ".job_tit a".to_string(),
                company_selector: Some(".corp_name a".to_string()),
                ..Default::default()
            },
            detail: DetailRules {
                ready_selector: None,
                fallback_selectors: strings(&[".user_content"]),
                frame_selector: Some("iframe#iframe_content_0".to_string()),
                body_char_cap: Some(1000),
                ..Default::default()
            },
            canonicalization: Canonicalization::KeepParam {
                name: "rec_idx".to_string(),
            },
            columns: ColumnSchema {
                body: "내용".to_string(),
                images: "이미지링크".to_string(),
                ..Default::default()
            },
            renderer: RendererKind::Browser,
            skip_body_threshold: default_skip_threshold(),
            settle_ms: 3000,
        }
    }

    fn career_page(name: &str, display_name: &str, csv: &str, url: &str, link: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            csv_path: PathBuf::from(csv),
            companies: vec![display_name.to_string()],
            search: SearchMethod::Listing {
                url: url.to_string(),
            },
            listing: ListingRules {
                ready_selector: Some(link.to_string()),
                link_selector: link.to_string(),
                match_company: false,
                ..Default::default()
            },
            detail: DetailRules {
                ready_selector: None,
                fallback_selectors: vec![],
                sections: vec![
                    SectionRule {
                        label: "주요업무".to_string(),
                        keywords: strings(&["주요 업무", "무슨 일을 하나요", "주요업무"]),
                    },
                    SectionRule {
                        label: "지원자격".to_string(),
                        keywords: strings(&["자격 요건", "지원 자격", "이런 분을 찾습니다", "지원자격"]),
                    },
                    SectionRule {
                        label: "우대사항".to_string(),
                        keywords: strings(&["우대 사항", "우대사항", "더 좋습니다"]),
                    },
                    SectionRule {
                        label: "채용절차".to_string(),
                        keywords: strings(&["채용 절차", "채용절차", "전형 절차"]),
                    },
                    SectionRule {
                        label: "근무지".to_string(),
                        keywords: strings(&["근무지", "근무 장소"]),
                    },
                ],
                section_stop_keywords: strings(&["복지", "혜택", "지원 방법", "목록으로"]),
                ..Default::default()
            },
            canonicalization: Canonicalization::AsIs,
            columns: ColumnSchema::default(),
            renderer: RendererKind::Browser,
            skip_body_threshold: default_skip_threshold(),
            settle_ms: 3000,
        }
    }

    pub fn water() -> Self {
        Self {
            canonicalization: Canonicalization::StripQuery,
            ..Self::career_page(
                "water",
                "워터(WATER)",
                "Water_EV_Recruitment_Master.csv",
                "https://watercharging.com/recruitments",
                "a[href*='/recruitments/']",
            )
        }
    }

    pub fn bep() -> Self {
        Self::career_page(
            "bep",
            "워터(BEP)",
            "BEP_EV_Recruitment_Master.csv",
            "https://bep.co.kr/Career/recruitment?type=3",
            "a[href*='recruitmentView']",
        )
    }
}

/// One ledger CSV watched by the notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyTarget {
    pub name: String,
    pub csv_path: PathBuf,
    pub date_col: String,
    pub url_col: String,
    pub title_col: String,
    pub company_col: Option<String>,
    #[serde(default)]
    pub body_col: Option<String>,
    pub default_company: String,
}

impl NotifyTarget {
    pub fn for_site(site: &SiteConfig) -> Self {
        Self {
            name: site.display_name.clone(),
            csv_path: site.csv_path.clone(),
            date_col: site.columns.first_seen.clone(),
            url_col: site.columns.url.clone(),
            title_col: site.columns.title.clone(),
            company_col: Some(site.columns.company.clone()),
            body_col: Some(site.columns.body.clone()),
            default_company: site
                .companies
                .first()
                .filter(|_| site.companies.len() == 1)
                .cloned()
                .unwrap_or_else(|| "알수없음".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub model: String,
    pub max_input_chars: usize,
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_input_chars: 2000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub sent_log: PathBuf,
    pub dashboard_link: String,
    pub targets: Vec<NotifyTarget>,
    pub summarizer: SummarizerConfig,
}

impl NotifyConfig {
    pub fn for_sites(sites: &[SiteConfig]) -> Self {
        Self {
            sent_log: PathBuf::from("sent_logs.txt"),
            dashboard_link: "https://ian939.github.io/HR-crawler-updated/".to_string(),
            targets: sites.iter().map(NotifyTarget::for_site).collect(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self::for_sites(&SiteConfig::defaults())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub csv_path: PathBuf,
    pub output_path: PathBuf,
    pub title: String,
    pub columns: Vec<String>,
    pub date_col: String,
    pub url_col: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        let columns = ColumnSchema::default();
        Self {
            csv_path: PathBuf::from("BEP_EV_Recruitment_Master.csv"),
            output_path: PathBuf::from("index.html"),
            title: "BEP 채용 공고".to_string(),
            columns: vec![
                columns.title.clone(),
                columns.body.clone(),
                columns.first_seen.clone(),
                columns.completed_date.clone(),
                columns.url.clone(),
            ],
            date_col: columns.first_seen,
            url_col: columns.url,
        }
    }
}

/// Reads a required secret from the environment.
pub fn require_env(name: &'static str) -> Result<String, TrackerError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(TrackerError::MissingSecret(name))
}

pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
