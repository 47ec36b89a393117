use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNKNOWN_EXPERIENCE: &str = "정보없음";
pub const UNKNOWN_TITLE: &str = "제목없음";

/// One row of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Posting {
    pub company: String,
    pub title: String,
    pub experience: String,
    pub body: String,
    pub images: Vec<String>,
    /// Canonical URL, the ledger key.
    pub url: String,
    pub first_seen: String,
    pub completed_date: String,
}

impl Posting {
    pub fn is_active(&self) -> bool {
        self.completed_date.is_empty()
    }

    pub fn images_joined(&self) -> String {
        self.images.join("|")
    }

    pub fn split_images(joined: &str) -> Vec<String> {
        joined
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

impl fmt::Display for Posting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Company         : {}", self.company)?;
        writeln!(f, "Title           : {}", self.title)?;
        writeln!(f, "Experience      : {}", self.experience)?;
        writeln!(f, "Url             : {}", self.url)?;
        writeln!(f, "Images          : {}", self.images.len())?;
        writeln!(f, "First Seen      : {}", self.first_seen)?;
        if self.completed_date.is_empty() {
            writeln!(f, "Completed       : None")?;
        } else {
            writeln!(f, "Completed       : {}", self.completed_date)?;
        }
        Ok(())
    }
}

/// Header names of the ledger CSV, in the order they are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSchema {
    pub company: String,
    pub title: String,
    pub experience: String,
    pub body: String,
    pub images: String,
    pub url: String,
    pub first_seen: String,
    pub completed_date: String,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self {
            company: "기업명".to_string(),
            title: "공고명".to_string(),
            experience: "경력".to_string(),
            body: "공고문 컬럼".to_string(),
            images: "이미지 링크".to_string(),
            url: "URL".to_string(),
            first_seen: "first-seen".to_string(),
            completed_date: "completed_date".to_string(),
        }
    }
}

impl ColumnSchema {
    pub fn headers(&self) -> [&str; 8] {
        [
            self.company.as_str(),
            self.title.as_str(),
            self.experience.as_str(),
            self.body.as_str(),
            self.images.as_str(),
            self.url.as_str(),
            self.first_seen.as_str(),
            self.completed_date.as_str(),
        ]
    }

    pub(crate) fn to_record(&self, p: &Posting) -> [String; 8] {
        [
            p.company.clone(),
            p.title.clone(),
            p.experience.clone(),
            p.body.clone(),
            p.images_joined(),
            p.url.clone(),
            p.first_seen.clone(),
            p.completed_date.clone(),
        ]
    }
}
