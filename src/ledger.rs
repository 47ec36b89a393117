use crate::canonical::Canonicalization;
use crate::posting::{ColumnSchema, Posting};
use crate::utils::char_len;
use crate::TrackerError;
use encoding_rs::{Encoding, EUC_KR, UTF_8};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Reactivated,
}

/// Postings keyed by canonical URL, in file order.
#[derive(Debug)]
pub struct Ledger {
    schema: ColumnSchema,
    rows: Vec<Posting>,
    index: HashMap<String, usize>,
}

impl Ledger {
    pub fn new(schema: ColumnSchema) -> Self {
        Self {
            schema,
            rows: vec![],
            index: HashMap::new(),
        }
    }

    /// Reads the master file at `path`, or starts an empty ledger when there is none.
    pub fn load(
        path: &Path,
        schema: ColumnSchema,
        canonicalization: &Canonicalization,
    ) -> Result<Self, TrackerError> {
        if !path.exists() {
            debug!("No ledger at {}, starting empty", path.display());
            return Ok(Self::new(schema));
        }
        let text = read_text(path)?;
        Self::from_csv_text(&text, schema, canonicalization)
    }

    /// Parses a ledger, keying rows by canonical URL. Rows that collapse onto an
    /// earlier key are dropped.
    pub fn from_csv_text(
        text: &str,
        schema: ColumnSchema,
        canonicalization: &Canonicalization,
    ) -> Result<Self, TrackerError> {
        let mut ledger = Self::new(schema);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.clone();
        let positions = ledger
            .schema
            .headers()
            .map(|name| headers.iter().position(|h| h.trim() == name));
        for (name, pos) in ledger.schema.headers().iter().zip(positions.iter()) {
            if pos.is_none() {
                debug!("Column {} missing, backfilling with empty values", name);
            }
        }

        for record in reader.records() {
            let record = record?;
            let field = |i: usize| {
                positions[i]
                    .and_then(|p| record.get(p))
                    .unwrap_or_default()
                    .to_string()
            };

            let posting = Posting {
                company: field(0),
                title: field(1),
                experience: field(2),
                body: field(3),
                images: Posting::split_images(&field(4)),
                url: canonicalization.apply(&field(5)),
                first_seen: field(6).trim().to_string(),
                completed_date: field(7).trim().to_string(),
            };

            if posting.url.is_empty() {
                warn!("Dropping ledger row without url: {}", posting.title);
                continue;
            }
            if ledger.index.contains_key(&posting.url) {
                warn!("Duplicate ledger row ignored: {}", posting.url);
                continue;
            }
            ledger.push(posting);
        }

        Ok(ledger)
    }

    fn push(&mut self, posting: Posting) {
        self.index.insert(posting.url.clone(), self.rows.len());
        self.rows.push(posting);
    }

    pub fn rows(&self) -> &[Posting] {
        self.rows.as_slice()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn get(&self, url: &str) -> Option<&Posting> {
        self.index.get(url).map(|&i| &self.rows[i])
    }

    /// True when the stored body is long enough that re-extraction can be skipped.
    pub fn has_body(&self, url: &str, threshold: usize) -> bool {
        self.get(url)
            .map(|p| char_len(p.body.trim()) > threshold)
            .unwrap_or(false)
    }

    /// Inserts a new posting or refreshes the mutable fields of an existing one.
    ///
    /// An existing row keeps its company, title and first-seen date; body, images and
    /// experience take the new values and a completed date is cleared.
    pub fn upsert(&mut self, posting: Posting, today: &str) -> Upsert {
        match self.index.get(&posting.url) {
            Some(&i) => {
                let row = &mut self.rows[i];
                row.body = posting.body;
                row.images = posting.images;
                row.experience = posting.experience;
                if row.first_seen.is_empty() {
                    row.first_seen = today.to_string();
                }
                if row.completed_date.is_empty() {
                    Upsert::Updated
                } else {
                    row.completed_date.clear();
                    Upsert::Reactivated
                }
            }
            None => {
                self.push(Posting {
                    first_seen: today.to_string(),
                    completed_date: String::new(),
                    ..posting
                });
                Upsert::Inserted
            }
        }
    }

    /// Clears the completed date of a stored row seen again; true if it was completed.
    pub fn reactivate(&mut self, url: &str) -> bool {
        match self.index.get(url) {
            Some(&i) if !self.rows[i].completed_date.is_empty() => {
                self.rows[i].completed_date.clear();
                true
            }
            _ => false,
        }
    }

    /// Marks every active row whose URL is not in `seen` as completed on `today`.
    pub fn mark_completed(&mut self, seen: &HashSet<String>, today: &str) -> usize {
        self.expire(seen, today, |_| true)
    }

    /// Like [`Ledger::mark_completed`], limited to rows of the given companies.
    pub fn mark_completed_scoped(
        &mut self,
        seen: &HashSet<String>,
        today: &str,
        companies: &[String],
    ) -> usize {
        self.expire(seen, today, |p| companies.iter().any(|c| c == &p.company))
    }

    fn expire<F: Fn(&Posting) -> bool>(
        &mut self,
        seen: &HashSet<String>,
        today: &str,
        in_scope: F,
    ) -> usize {
        let mut expired = 0;
        for row in self
            .rows
            .iter_mut()
            .filter(|p| p.is_active() && !seen.contains(&p.url))
        {
            if in_scope(row) {
                row.completed_date = today.to_string();
                expired += 1;
            }
        }
        expired
    }

    /// Writes the ledger as BOM-prefixed UTF-8 CSV, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), TrackerError> {
        let tmp = tmp_path(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(UTF8_BOM)?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(self.schema.headers())?;
            for row in &self.rows {
                writer.write_record(self.schema.to_record(row))?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        debug!("Saved {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn fallback_encodings() -> [&'static Encoding; 2] {
    [UTF_8, EUC_KR]
}

/// Decodes a file written by whatever tool last touched it.
///
/// A byte order mark decides the encoding outright; otherwise UTF-8 and then EUC-KR
/// are tried, first clean decode wins.
pub fn read_text(path: &Path) -> Result<String, TrackerError> {
    let bytes = fs::read(path)?;
    decode(&bytes).ok_or_else(|| TrackerError::EncodingError(path.to_path_buf()))
}

fn decode(bytes: &[u8]) -> Option<String> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return encoding
            .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
            .map(Cow::into_owned);
    }
    fallback_encodings().iter().find_map(|encoding| {
        let text = encoding.decode_without_bom_handling_and_without_replacement(bytes)?;
        debug!("Decoded with {}", encoding.name());
        Some(text.into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Canonicalization;
    use pretty_assertions::assert_eq;

    fn posting(url: &str, body: &str) -> Posting {
        Posting {
            company: "대영채비".to_string(),
            title: "충전기 펌웨어 개발".to_string(),
            experience: "경력 3년".to_string(),
            body: body.to_string(),
            images: vec!["https://img/1.png".to_string()],
            url: url.to_string(),
            ..Default::default()
        }
    }

    fn seen(urls: &[&str]) -> HashSet<String> {
        urls.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_lifecycle_scenario() {
        let mut ledger = Ledger::new(ColumnSchema::default());
        assert_eq!(
            ledger.upsert(posting("https://x/1", ""), "2024-01-01"),
            Upsert::Inserted
        );
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.rows()[0].first_seen, "2024-01-01");
        assert_eq!(ledger.rows()[0].completed_date, "");

        assert_eq!(ledger.mark_completed(&seen(&[]), "2024-01-01"), 1);
        assert_eq!(ledger.rows()[0].completed_date, "2024-01-01");

        assert_eq!(
            ledger.upsert(posting("https://x/1", ""), "2024-01-05"),
            Upsert::Reactivated
        );
        assert_eq!(ledger.rows()[0].completed_date, "");
        assert_eq!(ledger.rows()[0].first_seen, "2024-01-01");
    }

    #[test]
    fn test_upsert_is_idempotent_and_takes_latest_fields() {
        let mut ledger = Ledger::new(ColumnSchema::default());
        ledger.upsert(posting("https://x/1", "old body"), "2024-01-01");

        let mut latest = posting("https://x/1", "new body");
        latest.images = vec!["https://img/2.png".to_string(), "https://img/3.png".to_string()];
        ledger.upsert(latest.clone(), "2024-02-01");
        ledger.upsert(latest, "2024-02-02");

        assert_eq!(ledger.len(), 1);
        let row = &ledger.rows()[0];
        assert_eq!(row.first_seen, "2024-01-01");
        assert_eq!(row.body, "new body");
        assert_eq!(row.images_joined(), "https://img/2.png|https://img/3.png");
    }

    #[test]
    fn test_expiry_happens_once() {
        let mut ledger = Ledger::new(ColumnSchema::default());
        ledger.upsert(posting("https://x/1", ""), "2024-01-01");
        ledger.upsert(posting("https://x/2", ""), "2024-01-01");

        let current = seen(&["https://x/2"]);
        assert_eq!(ledger.mark_completed(&current, "2024-01-03"), 1);
        assert_eq!(ledger.mark_completed(&current, "2024-01-04"), 0);
        assert_eq!(ledger.get("https://x/1").unwrap().completed_date, "2024-01-03");
        assert!(ledger.get("https://x/2").unwrap().is_active());
    }

    #[test]
    fn test_scoped_expiry_leaves_other_companies() {
        let mut ledger = Ledger::new(ColumnSchema::default());
        ledger.upsert(posting("https://x/1", ""), "2024-01-01");
        let mut other = posting("https://x/2", "");
        other.company = "에버온".to_string();
        ledger.upsert(other, "2024-01-01");

        let expired =
            ledger.mark_completed_scoped(&seen(&[]), "2024-01-02", &["대영채비".to_string()]);
        assert_eq!(expired, 1);
        assert!(ledger.get("https://x/2").unwrap().is_active());
    }

    #[test]
    fn test_canonical_urls_merge_into_one_row() {
        let rule = Canonicalization::StripQuery;
        let mut ledger = Ledger::new(ColumnSchema::default());
        ledger.upsert(
            posting(&rule.apply("https://www.wanted.co.kr/wd/9?utm_source=a"), ""),
            "2024-01-01",
        );
        ledger.upsert(
            posting(&rule.apply("https://www.wanted.co.kr/wd/9?utm_campaign=b"), ""),
            "2024-01-02",
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_loaded_urls_are_canonicalized() {
        let text = "\
기업명,공고명,URL,first-seen,completed_date
차지비,설치 PM,https://www.saramin.co.kr/zf_user/jobs/relay/view?view_type=search&rec_idx=48120001&location=ts,2023-11-02,
차지비,설치 PM,https://www.saramin.co.kr/zf_user/jobs/relay/view?rec_idx=48120001&t_ref=main,2023-11-05,
";
        let rule = Canonicalization::KeepParam {
            name: "rec_idx".to_string(),
        };
        let mut ledger = Ledger::from_csv_text(text, ColumnSchema::default(), &rule).unwrap();
        let key = "https://www.saramin.co.kr/zf_user/jobs/relay/view?rec_idx=48120001";
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(key).unwrap().first_seen, "2023-11-02");

        let mut fresh = posting(key, "새 본문");
        fresh.company = "차지비".to_string();
        assert_eq!(ledger.upsert(fresh, "2024-01-02"), Upsert::Updated);
        assert_eq!(ledger.mark_completed(&seen(&[key]), "2024-01-02"), 0);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_reactivate_clears_completed_date_only() {
        let mut ledger = Ledger::new(ColumnSchema::default());
        ledger.upsert(posting("https://x/1", "본문"), "2024-01-01");
        assert!(!ledger.reactivate("https://x/1"));

        ledger.mark_completed(&seen(&[]), "2024-01-02");
        assert!(ledger.reactivate("https://x/1"));
        let row = ledger.get("https://x/1").unwrap();
        assert!(row.is_active());
        assert_eq!(row.first_seen, "2024-01-01");
        assert_eq!(row.body, "본문");
        assert!(!ledger.reactivate("https://x/404"));
    }

    #[test]
    fn test_has_body_threshold() {
        let mut ledger = Ledger::new(ColumnSchema::default());
        ledger.upsert(posting("https://x/1", "짧음"), "2024-01-01");
        ledger.upsert(posting("https://x/2", &"주요업무 ".repeat(20)), "2024-01-01");
        assert!(!ledger.has_body("https://x/1", 50));
        assert!(ledger.has_body("https://x/2", 50));
        assert!(!ledger.has_body("https://x/3", 50));
    }

    #[test]
    fn test_missing_columns_are_backfilled() {
        let text = "기업명,공고명,URL,first-seen\n차지비,백엔드,https://x/1,2023-12-01\n";
        let ledger =
            Ledger::from_csv_text(text, ColumnSchema::default(), &Canonicalization::AsIs).unwrap();
        let row = &ledger.rows()[0];
        assert_eq!(row.company, "차지비");
        assert_eq!(row.first_seen, "2023-12-01");
        assert_eq!(row.body, "");
        assert_eq!(row.completed_date, "");
        assert!(row.images.is_empty());
    }

    #[test]
    fn test_save_then_load_keeps_rows_and_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wanted_results.csv");

        let mut ledger = Ledger::new(ColumnSchema::default());
        ledger.upsert(posting("https://x/1", "본문, 쉼표와\n줄바꿈"), "2024-01-01");
        ledger.mark_completed(&seen(&[]), "2024-01-02");
        ledger.save(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));

        let loaded =
            Ledger::load(&path, ColumnSchema::default(), &Canonicalization::AsIs).unwrap();
        assert_eq!(loaded.rows(), ledger.rows());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_legacy_euc_kr_file_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        let text = "기업명,공고명,URL\n에버온,연구원,https://x/1\n";
        let (bytes, _, had_errors) = EUC_KR.encode(text);
        assert!(!had_errors);
        fs::write(&path, &bytes).unwrap();

        let loaded =
            Ledger::load(&path, ColumnSchema::default(), &Canonicalization::AsIs).unwrap();
        assert_eq!(loaded.rows()[0].company, "에버온");
    }

    #[test]
    fn test_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(
            &dir.path().join("none.csv"),
            ColumnSchema::default(),
            &Canonicalization::AsIs,
        )
        .unwrap();
        assert!(ledger.is_empty());
    }
}
