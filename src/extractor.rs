use crate::canonical;
use crate::posting::{UNKNOWN_EXPERIENCE, UNKNOWN_TITLE};
use crate::utils::{char_len, truncate_chars};
use crate::TrackerError;
use lazy_regex::regex;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

const E: &str = "Invalid selector";
lazy_static! {
    static ref H1: Selector = Selector::parse("h1").expect(E);
    static ref IMG: Selector = Selector::parse("img").expect(E);
    static ref MAIN: Selector = Selector::parse("main").expect(E);
    static ref BODY: Selector = Selector::parse("body").expect(E);
}

const SKIPPED_TAGS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

/// How the body of a detail page is located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailRules {
    /// Element to wait for before reading the page.
    pub ready_selector: Option<String>,
    /// Section headings, highest priority first.
    pub section_keywords: Vec<String>,
    /// Tags a heading may have; empty accepts any tag.
    pub heading_tags: Vec<String>,
    pub heading_max_len: usize,
    pub max_ancestors: usize,
    pub container_min_len: usize,
    pub container_stop_keywords: Vec<String>,
    pub container_stop_len: usize,
    pub fallback_selectors: Vec<String>,
    pub page_text_cap: usize,
    pub body_char_cap: Option<usize>,
    /// Embedded document holding the actual posting.
    pub frame_selector: Option<String>,
    /// When set, the page text is split into these labelled sections.
    pub sections: Vec<SectionRule>,
    pub section_stop_keywords: Vec<String>,
    pub experience_header_levels: usize,
    pub experience_window: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRule {
    pub label: String,
    pub keywords: Vec<String>,
}

impl Default for DetailRules {
    fn default() -> Self {
        Self {
            ready_selector: Some("h1".to_string()),
            section_keywords: vec![],
            heading_tags: vec![],
            heading_max_len: 50,
            max_ancestors: 6,
            container_min_len: 100,
            container_stop_keywords: vec!["자격".to_string(), "우대".to_string()],
            container_stop_len: 300,
            fallback_selectors: vec!["article".to_string()],
            page_text_cap: 1000,
            body_char_cap: None,
            frame_selector: None,
            sections: vec![],
            section_stop_keywords: vec![],
            experience_header_levels: 3,
            experience_window: 1000,
        }
    }
}

/// [`DetailRules`] with their selectors parsed.
#[derive(Debug)]
pub struct DetailPlan {
    pub rules: DetailRules,
    fallbacks: Vec<Selector>,
    frame: Option<Selector>,
}

pub(crate) fn parse_selector(s: &str) -> Result<Selector, TrackerError> {
    Selector::parse(s).map_err(|e| TrackerError::SelectorError(format!("{}: {:?}", s, e)))
}

impl DetailPlan {
    pub fn compile(rules: &DetailRules) -> Result<Self, TrackerError> {
        let fallbacks = rules
            .fallback_selectors
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>, _>>()?;
        let frame = rules
            .frame_selector
            .as_deref()
            .map(parse_selector)
            .transpose()?;
        Ok(Self {
            rules: rules.clone(),
            fallbacks,
            frame,
        })
    }

    /// Source of the embedded posting document, if the page has one.
    pub fn frame_src(&self, html: &str, page_url: &str) -> Option<String> {
        let frame = self.frame.as_ref()?;
        let doc = Html::parse_document(html);
        let src = doc.select(frame).next()?.value().attr("src")?;
        canonical::resolve(page_url, src)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Experience {
    NewGrad,
    Years(String),
    Any,
    Unknown,
}

impl Experience {
    /// Classifies the first experience phrase found in `text`.
    pub fn classify(text: &str) -> Experience {
        let Some(caps) = regex!(r"신입|경력\s*([\d.~\-+]*)\s*년|경력\s*무관").captures(text) else {
            return Experience::Unknown;
        };
        match (caps.get(0).map(|m| m.as_str()), caps.get(1)) {
            (Some("신입"), _) => Experience::NewGrad,
            (_, Some(years)) => Experience::Years(years.as_str().to_string()),
            _ => Experience::Any,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Experience::Unknown)
    }
}

impl fmt::Display for Experience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Experience::NewGrad => write!(f, "신입"),
            Experience::Years(years) if years.is_empty() => write!(f, "경력"),
            Experience::Years(years) => write!(f, "경력 {}년", years),
            Experience::Any => write!(f, "경력무관"),
            Experience::Unknown => write!(f, "{}", UNKNOWN_EXPERIENCE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub title: String,
    pub body: String,
    pub images: Vec<String>,
    pub experience: Experience,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Region {
    text: String,
    images: Vec<String>,
}

struct Page<'a> {
    doc: &'a Html,
    url: &'a str,
    title: &'a str,
}

type BodyStep = for<'a> fn(&Page<'a>, &DetailPlan) -> Option<Region>;

const BODY_PIPELINE: [BodyStep; 4] = [by_sections, by_section_heading, by_container, by_page_text];

/// Pulls the posting fields out of a rendered detail page.
///
/// `frame` is the embedded posting document when the site uses one; the body is read
/// from it while the title stays with the outer page. Nothing here fails: a field that
/// cannot be found is left empty or at its default.
pub fn extract(
    html: &str,
    frame: Option<&str>,
    page_url: &str,
    plan: &DetailPlan,
    fallback_title: Option<&str>,
) -> Extracted {
    let doc = Html::parse_document(html);
    let frame_doc = frame.map(Html::parse_document);

    let title = extract_title(&doc).unwrap_or_else(|| {
        fallback_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(UNKNOWN_TITLE)
            .trim()
            .to_string()
    });

    let mut experience = extract_experience(&doc, &plan.rules);

    let source = frame_doc.as_ref().unwrap_or(&doc);
    if experience.is_unknown() && frame_doc.is_some() {
        experience = Experience::classify(&truncate_chars(
            &page_text(source),
            plan.rules.experience_window,
        ));
    }

    let page = Page {
        doc: source,
        url: page_url,
        title: &title,
    };
    let region = BODY_PIPELINE
        .iter()
        .find_map(|step| step(&page, plan).filter(|r| !r.text.trim().is_empty()));

    let (mut body, images) = match region {
        Some(region) => (region.text, region.images),
        None => (String::new(), vec![]),
    };
    if let Some(cap) = plan.rules.body_char_cap {
        body = truncate_chars(&body, cap);
    }

    Extracted {
        title,
        body,
        images,
        experience,
    }
}

fn collect_text(el: ElementRef<'_>, out: &mut Vec<String>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    out.push(text.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    if !SKIPPED_TAGS.contains(&child.value().name()) {
                        collect_text(child, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Rendered text of an element, one text node per line.
pub(crate) fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = vec![];
    collect_text(el, &mut out);
    out.join("\n")
}

fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|c| c.value().as_text().map(|t| t.trim().to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn page_text(doc: &Html) -> String {
    doc.select(&MAIN)
        .next()
        .or_else(|| doc.select(&BODY).next())
        .map(visible_text)
        .unwrap_or_default()
}

fn images_in(el: ElementRef<'_>, page_url: &str) -> Vec<String> {
    el.select(&IMG)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.starts_with("data:"))
        .filter_map(|src| canonical::resolve(page_url, src))
        .collect()
}

fn extract_title(doc: &Html) -> Option<String> {
    doc.select(&H1)
        .next()
        .map(|h1| visible_text(h1).replace('\n', " ").trim().to_string())
        .filter(|t| !t.is_empty())
}

fn extract_experience(doc: &Html, rules: &DetailRules) -> Experience {
    if rules.experience_header_levels > 0 {
        if let Some(h1) = doc.select(&H1).next() {
            let mut header = String::new();
            let mut current = h1;
            for _ in 0..rules.experience_header_levels {
                match current.parent().and_then(ElementRef::wrap) {
                    Some(parent) => current = parent,
                    None => break,
                }
                header.push(' ');
                header.push_str(&visible_text(current));
            }
            let experience = Experience::classify(&header);
            if !experience.is_unknown() {
                return experience;
            }
        }
    }

    let candidate = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| !SKIPPED_TAGS.contains(&el.value().name()))
        .filter(|el| {
            let own = own_text(*el);
            own.contains("경력") || own.contains("신입")
        })
        .map(visible_text)
        .filter(|text| (1..50).contains(&char_len(text)))
        .map(|text| Experience::classify(&text))
        .find(|e| !e.is_unknown());
    if let Some(experience) = candidate {
        return experience;
    }

    Experience::classify(&truncate_chars(&page_text(doc), rules.experience_window))
}

fn is_heading(el: &ElementRef<'_>, keyword: &str, rules: &DetailRules) -> bool {
    let name = el.value().name();
    if SKIPPED_TAGS.contains(&name) {
        return false;
    }
    if !rules.heading_tags.is_empty() && !rules.heading_tags.iter().any(|t| t == name) {
        return false;
    }
    own_text(*el).contains(keyword) && char_len(&visible_text(*el)) < rules.heading_max_len
}

/// Finds a short heading such as "주요업무" and climbs to the block holding the sections.
fn by_section_heading(page: &Page<'_>, plan: &DetailPlan) -> Option<Region> {
    let rules = &plan.rules;
    let anchor = rules.section_keywords.iter().find_map(|keyword| {
        page.doc
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| is_heading(el, keyword, rules))
    })?;

    let mut current = anchor;
    let mut container = None;
    for _ in 0..rules.max_ancestors {
        match current.parent().and_then(ElementRef::wrap) {
            Some(parent) => current = parent,
            None => break,
        }
        let text = visible_text(current);
        let len = char_len(&text);
        if len > rules.container_min_len {
            let complete = len > rules.container_stop_len
                && rules
                    .container_stop_keywords
                    .iter()
                    .any(|k| text.contains(k.as_str()));
            container = Some((current, text));
            if complete {
                break;
            }
        }
    }

    container.map(|(el, text)| Region {
        text: text.trim().to_string(),
        images: images_in(el, page.url),
    })
}

fn by_container(page: &Page<'_>, plan: &DetailPlan) -> Option<Region> {
    plan.fallbacks.iter().find_map(|selector| {
        let el = page.doc.select(selector).next()?;
        let text = visible_text(el);
        if text.trim().is_empty() {
            return None;
        }
        Some(Region {
            text: text.trim().to_string(),
            images: images_in(el, page.url),
        })
    })
}

fn by_page_text(page: &Page<'_>, plan: &DetailPlan) -> Option<Region> {
    let text = page_text(page.doc);
    Some(Region {
        text: truncate_chars(text.trim(), plan.rules.page_text_cap),
        images: vec![],
    })
}

/// Splits the page text into labelled sections by heading keywords.
fn by_sections(page: &Page<'_>, plan: &DetailPlan) -> Option<Region> {
    let rules = &plan.rules;
    if rules.sections.is_empty() {
        return None;
    }

    let mut collected: Vec<(String, Vec<String>)> = rules
        .sections
        .iter()
        .map(|s| (s.label.clone(), vec![]))
        .collect();
    let mut current: Option<usize> = None;

    for line in page_text(page.doc).lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(i) = rules
            .sections
            .iter()
            .position(|s| s.keywords.iter().any(|k| line.contains(k.as_str())))
        {
            current = Some(i);
        } else if rules
            .section_stop_keywords
            .iter()
            .any(|k| line.contains(k.as_str()))
        {
            current = None;
        } else if let Some(i) = current {
            if !page.title.contains(line) {
                collected[i].1.push(line.to_string());
            }
        }
    }

    let text = collected
        .into_iter()
        .filter(|(_, lines)| !lines.is_empty())
        .map(|(label, lines)| format!("[{}]\n{}", label, lines.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n");

    (!text.is_empty()).then(|| Region {
        text,
        images: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn wanted_rules() -> DetailRules {
        DetailRules {
            section_keywords: vec!["주요업무".to_string(), "자격요건".to_string()],
            heading_tags: vec!["h2".to_string(), "h3".to_string(), "strong".to_string()],
            fallback_selectors: vec!["div[class*='JobContent_description']".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_experience_classification() {
        assert_eq!(Experience::classify("신입 환영"), Experience::NewGrad);
        assert_eq!(
            Experience::classify("서울 강남구 · 경력 3~5년"),
            Experience::Years("3~5".to_string())
        );
        assert_eq!(Experience::classify("경력 무관"), Experience::Any);
        assert_eq!(Experience::classify("근무지 판교"), Experience::Unknown);
        // first match wins
        assert_eq!(
            Experience::classify("경력 2년 이상 (신입 지원 가능)"),
            Experience::Years("2".to_string())
        );
        assert_eq!(Experience::Years("5+".to_string()).to_string(), "경력 5+년");
        assert_eq!(Experience::Unknown.to_string(), "정보없음");
    }

    #[test]
    fn test_wanted_detail_by_section_heading() {
        let html = fs::read_to_string("tests/htmls/wanted_detail.html").expect("Invalid file url");
        let plan = DetailPlan::compile(&wanted_rules()).unwrap();
        let extracted = extract(&html, None, "https://www.wanted.co.kr/wd/1001", &plan, None);

        assert_eq!(extracted.title, "충전 플랫폼 백엔드 개발자");
        assert_eq!(extracted.experience, Experience::Years("3".to_string()));
        assert!(extracted.body.starts_with("주요업무"));
        assert!(extracted.body.contains("우대사항"));
        assert!(!extracted.body.contains("__NEXT_DATA__"));
        assert_eq!(
            extracted.images,
            vec!["https://static.wanted.co.kr/images/company/1001/office.jpg".to_string()]
        );
    }

    #[test]
    fn test_fallback_container_when_no_heading() {
        let html = r#"<html><body><h1>펌웨어 엔지니어</h1>
            <div class="JobContent_descriptionWrapper__x">충전기 제어 보드 펌웨어를 설계하고 유지보수합니다.</div>
            </body></html>"#;
        let plan = DetailPlan::compile(&wanted_rules()).unwrap();
        let extracted = extract(html, None, "https://www.wanted.co.kr/wd/2", &plan, None);
        assert_eq!(extracted.body, "충전기 제어 보드 펌웨어를 설계하고 유지보수합니다.");
        assert_eq!(extracted.experience, Experience::Unknown);
    }

    #[test]
    fn test_page_text_fallback_is_capped() {
        let long = "가".repeat(3000);
        let html = format!("<html><body><p>{}</p></body></html>", long);
        let rules = DetailRules {
            fallback_selectors: vec![],
            page_text_cap: 1000,
            ..Default::default()
        };
        let plan = DetailPlan::compile(&rules).unwrap();
        let extracted = extract(&html, None, "https://x/1", &plan, Some("목록 제목"));
        assert_eq!(char_len(&extracted.body), 1000);
        assert_eq!(extracted.title, "목록 제목");
    }

    #[test]
    fn test_empty_page_degrades_to_defaults() {
        let plan = DetailPlan::compile(&DetailRules::default()).unwrap();
        let extracted = extract("<html></html>", None, "https://x/1", &plan, None);
        assert_eq!(extracted.title, UNKNOWN_TITLE);
        assert_eq!(extracted.body, "");
        assert!(extracted.images.is_empty());
        assert_eq!(extracted.experience, Experience::Unknown);
    }

    #[test]
    fn test_frame_document_supplies_body() {
        let outer = r#"<html><body><h1>EV 충전 운영 매니저</h1><p>경력 무관</p>
            <iframe id="iframe_content_0" src="/zf_user/jobs/relay/view-detail?rec_idx=42"></iframe></body></html>"#;
        let inner = r#"<html><body><div class="user_content">충전소 운영 관리<img src="/img/a.png"></div></body></html>"#;
        let rules = DetailRules {
            frame_selector: Some("iframe#iframe_content_0".to_string()),
            fallback_selectors: vec![".user_content".to_string()],
            body_char_cap: Some(4),
            ..Default::default()
        };
        let plan = DetailPlan::compile(&rules).unwrap();
        assert_eq!(
            plan.frame_src(outer, "https://www.saramin.co.kr/zf_user/jobs/relay/view?rec_idx=42")
                .as_deref(),
            Some("https://www.saramin.co.kr/zf_user/jobs/relay/view-detail?rec_idx=42")
        );

        let extracted = extract(
            outer,
            Some(inner),
            "https://www.saramin.co.kr/zf_user/jobs/relay/view?rec_idx=42",
            &plan,
            None,
        );
        assert_eq!(extracted.title, "EV 충전 운영 매니저");
        assert_eq!(extracted.experience, Experience::Any);
        assert_eq!(extracted.body, "충전소 ");
        assert_eq!(
            extracted.images,
            vec!["https://www.saramin.co.kr/img/a.png".to_string()]
        );
    }

    #[test]
    fn test_career_page_sections() {
        let html = fs::read_to_string("tests/htmls/career_detail.html").expect("Invalid file url");
        let rules = DetailRules {
            sections: vec![
                SectionRule {
                    label: "주요업무".to_string(),
                    keywords: vec!["주요 업무".to_string(), "주요업무".to_string()],
                },
                SectionRule {
                    label: "지원자격".to_string(),
                    keywords: vec!["자격 요건".to_string(), "지원자격".to_string()],
                },
            ],
            section_stop_keywords: vec!["복지".to_string(), "목록으로".to_string()],
            ..Default::default()
        };
        let plan = DetailPlan::compile(&rules).unwrap();
        let extracted = extract(&html, None, "https://watercharging.com/recruitments/7", &plan, None);

        assert_eq!(extracted.title, "충전 인프라 운영 담당자");
        assert_eq!(
            extracted.body,
            "[주요업무]\n충전소 유지보수 일정 관리\n현장 협력사 커뮤니케이션\n\n[지원자격]\n전기 관련 자격증 보유자"
        );
    }
}
