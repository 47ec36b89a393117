use crate::config::{NotifyConfig, NotifyTarget};
use crate::ledger::read_text;
use crate::summarize::Summarizer;
use crate::TrackerError;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// URLs already announced, one per line.
#[derive(Debug)]
pub struct SentLog {
    path: PathBuf,
    urls: HashSet<String>,
}

impl SentLog {
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        let urls = if path.exists() {
            read_text(path)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(ToString::to_string)
                .collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            urls,
        })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn append<'a, I: IntoIterator<Item = &'a str>>(&mut self, urls: I) -> Result<(), TrackerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for url in urls {
            if self.urls.insert(url.to_string()) {
                writeln!(file, "{}", url)?;
            }
        }
        Ok(())
    }
}

/// A posting about to be announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPosting {
    pub company: String,
    pub title: String,
    pub url: String,
    pub body: String,
    pub summary: Option<String>,
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Rows of `csv_text` first seen on `today` whose URL has not been announced yet.
pub fn select_new(
    csv_text: &str,
    target: &NotifyTarget,
    sent: &SentLog,
    today: &str,
) -> Result<Vec<NewPosting>, TrackerError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(csv_text.as_bytes());
    let headers = reader.headers()?.clone();

    let (date, url, title) = match (
        column(&headers, &target.date_col),
        column(&headers, &target.url_col),
        column(&headers, &target.title_col),
    ) {
        (Some(d), Some(u), Some(t)) => (d, u, t),
        _ => {
            warn!("{}: expected columns are missing", target.name);
            return Ok(vec![]);
        }
    };
    let company = target.company_col.as_deref().and_then(|c| column(&headers, c));
    let body = target.body_col.as_deref().and_then(|c| column(&headers, c));

    let mut found = vec![];
    let mut queued = HashSet::new();
    for record in reader.records() {
        let record = record?;
        let cell = |i: usize| record.get(i).unwrap_or("").trim().to_string();

        let row_url = cell(url);
        if cell(date) != today || row_url.is_empty() || sent.contains(&row_url) {
            continue;
        }
        if !queued.insert(row_url.clone()) {
            continue;
        }

        let company = company
            .map(cell)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| target.default_company.clone());
        found.push(NewPosting {
            company,
            title: cell(title),
            url: row_url,
            body: body.map(cell).unwrap_or_default(),
            summary: None,
        });
    }
    Ok(found)
}

/// Slack blocks for one source.
pub fn build_payload(source: &str, dashboard_link: &str, postings: &[NewPosting]) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {"type": "plain_text", "text": format!("🔔 [채용 알림] {} 신규 공고", source)}
        }),
        json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": format!("👉 <{}|전체 채용 대시보드 확인하기>", dashboard_link)}
        }),
        json!({"type": "divider"}),
        json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": format!("오늘 확인된 *{}건*의 새로운 공고가 있습니다.", postings.len())}
        }),
    ];

    for p in postings {
        let mut text = format!(
            "• *[{}] {}*\n   📄 <{}|공고 내용 자세히 보기>",
            p.company, p.title, p.url
        );
        if let Some(summary) = &p.summary {
            text.push_str(&format!("\n   💡 {}", summary));
        }
        blocks.push(json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": text}
        }));
    }

    json!({ "blocks": blocks })
}

pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
    config: NotifyConfig,
    summarizer: Option<Summarizer>,
}

impl Notifier {
    pub fn new(
        webhook_url: String,
        config: NotifyConfig,
        summarizer: Option<Summarizer>,
    ) -> Result<Self, TrackerError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            webhook_url,
            config,
            summarizer,
        })
    }

    /// Announces today's postings of every target; returns how many were sent.
    pub async fn run(&self, today: &str) -> Result<usize, TrackerError> {
        let mut sent = SentLog::load(&self.config.sent_log)?;
        let mut total = 0;

        for target in &self.config.targets {
            if !target.csv_path.exists() {
                info!("{}: {} not found, skip", target.name, target.csv_path.display());
                continue;
            }
            let text = match read_text(&target.csv_path) {
                Ok(text) => text,
                Err(e) => {
                    error!("{}: cannot read ledger: {:?}", target.name, e);
                    continue;
                }
            };
            let mut postings = match select_new(&text, target, &sent, today) {
                Ok(p) => p,
                Err(e) => {
                    error!("{}: cannot parse ledger: {:?}", target.name, e);
                    continue;
                }
            };
            if postings.is_empty() {
                info!("{}: nothing new", target.name);
                continue;
            }

            if let Some(summarizer) = &self.summarizer {
                for p in postings.iter_mut().filter(|p| !p.body.is_empty()) {
                    p.summary = Some(summarizer.summarize(&p.body).await);
                }
            }

            let payload = build_payload(&target.name, &self.config.dashboard_link, &postings);
            match self.post(&payload).await {
                Ok(()) => {
                    info!("{}: announced {} postings", target.name, postings.len());
                    total += postings.len();
                    if let Err(e) = sent.append(postings.iter().map(|p| p.url.as_str())) {
                        error!("{}: cannot record sent urls: {:?}", target.name, e);
                    }
                }
                Err(e) => error!("{}: webhook failed: {:?}", target.name, e),
            }
        }

        Ok(total)
    }

    async fn post(&self, payload: &Value) -> Result<(), TrackerError> {
        self.client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use pretty_assertions::assert_eq;

    const LEDGER: &str = "\
기업명,공고명,경력,공고문 컬럼,이미지 링크,URL,first-seen,completed_date
대영채비,충전기 펌웨어 개발,경력 3년,펌웨어 본문,,https://www.wanted.co.kr/wd/1,2024-01-02,
,설치 PM,신입,,,https://www.wanted.co.kr/wd/2,2024-01-02,
차지비,회계 담당,경력무관,,,https://www.wanted.co.kr/wd/3,2024-01-01,
차지비,회계 담당,경력무관,,,https://www.wanted.co.kr/wd/4,2024-01-02,
";

    fn target() -> NotifyTarget {
        let mut target = NotifyTarget::for_site(&SiteConfig::wanted());
        target.default_company = "알수없음".to_string();
        target
    }

    #[test]
    fn test_select_new_filters_date_and_sent_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sent_logs.txt");
        std::fs::write(&log, "https://www.wanted.co.kr/wd/4\n").unwrap();
        let sent = SentLog::load(&log).unwrap();

        let found = select_new(LEDGER, &target(), &sent, "2024-01-02").unwrap();
        assert_eq!(
            found.iter().map(|p| p.url.as_str()).collect::<Vec<_>>(),
            vec!["https://www.wanted.co.kr/wd/1", "https://www.wanted.co.kr/wd/2"]
        );
        assert_eq!(found[0].body, "펌웨어 본문");
        assert_eq!(found[1].company, "알수없음");
    }

    #[test]
    fn test_sent_log_append_prevents_second_announcement() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sent_logs.txt");
        let mut sent = SentLog::load(&log).unwrap();
        assert!(sent.is_empty());

        let first = select_new(LEDGER, &target(), &sent, "2024-01-02").unwrap();
        assert_eq!(first.len(), 3);
        sent.append(first.iter().map(|p| p.url.as_str())).unwrap();

        let reloaded = SentLog::load(&log).unwrap();
        assert_eq!(reloaded.len(), 3);
        let second = select_new(LEDGER, &target(), &reloaded, "2024-01-02").unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_missing_columns_select_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sent = SentLog::load(&dir.path().join("log.txt")).unwrap();
        let found = select_new("a,b\n1,2\n", &target(), &sent, "2024-01-02").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_payload_blocks() {
        let postings = vec![NewPosting {
            company: "볼트업".to_string(),
            title: "충전 인프라 운영".to_string(),
            url: "https://www.wanted.co.kr/wd/9".to_string(),
            body: String::new(),
            summary: Some("운영 업무 요약".to_string()),
        }];
        let payload = build_payload("원티드(Wanted)", "https://dash.example", &postings);
        let blocks = payload["blocks"].as_array().unwrap();

        assert_eq!(blocks.len(), 5);
        assert_eq!(
            blocks[0]["text"]["text"],
            "🔔 [채용 알림] 원티드(Wanted) 신규 공고"
        );
        assert_eq!(blocks[2]["type"], "divider");
        assert_eq!(
            blocks[3]["text"]["text"],
            "오늘 확인된 *1건*의 새로운 공고가 있습니다."
        );
        assert_eq!(
            blocks[4]["text"]["text"],
            "• *[볼트업] 충전 인프라 운영*\n   📄 <https://www.wanted.co.kr/wd/9|공고 내용 자세히 보기>\n   💡 운영 업무 요약"
        );
    }

    /// Answers every request with 200 and counts them.
    async fn accepting_webhook() -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![];
                let mut chunk = [0u8; 4096];
                loop {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let len = text[..end]
                            .lines()
                            .find_map(|l| {
                                l.to_ascii_lowercase()
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if buf.len() >= end + 4 + len {
                            break;
                        }
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            }
        });
        (format!("http://{}/hook", addr), hits)
    }

    #[tokio::test]
    async fn test_unwritable_sent_log_does_not_stop_other_sources() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("wanted.csv");
        std::fs::write(&csv, LEDGER).unwrap();

        let mut first = target();
        first.csv_path = csv.clone();
        let mut second = target();
        second.name = "리멤버(Remember)".to_string();
        second.csv_path = csv;
        let config = NotifyConfig {
            sent_log: dir.path().join("missing").join("sent_logs.txt"),
            dashboard_link: "https://dash.example".to_string(),
            targets: vec![first, second],
            summarizer: Default::default(),
        };
        let (url, hits) = accepting_webhook().await;
        let notifier = Notifier::new(url, config, None).unwrap();

        assert_eq!(notifier.run("2024-01-02").await.unwrap(), 6);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_post_keeps_sent_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("wanted.csv");
        std::fs::write(&csv, LEDGER).unwrap();
        let log = dir.path().join("sent_logs.txt");

        let mut target = target();
        target.csv_path = csv;
        let config = NotifyConfig {
            sent_log: log.clone(),
            dashboard_link: "https://dash.example".to_string(),
            targets: vec![target],
            summarizer: Default::default(),
        };
        let notifier =
            Notifier::new("http://127.0.0.1:9/hook".to_string(), config, None).unwrap();

        assert_eq!(notifier.run("2024-01-02").await.unwrap(), 0);
        assert!(SentLog::load(&log).unwrap().is_empty());
    }
}
