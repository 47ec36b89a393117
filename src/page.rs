use crate::config::PageConfig;
use crate::ledger::read_text;
use crate::TrackerError;
use chrono::NaiveDate;
use maud::{html, Markup, DOCTYPE};
use std::fs;
use std::path::Path;
use tracing::info;

const BOOTSTRAP_CSS: &str = "https://cdn.jsdelivr.net/npm/bootstrap@5.3.2/dist/css/bootstrap.min.css";
const EMPTY_CELL: &str = "-";

/// The selected columns of a ledger, ordered by first-seen date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_csv_text(text: &str, config: &PageConfig) -> Result<Self, TrackerError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());
        let all = reader.headers()?.clone();
        let index_of = |name: &str| all.iter().position(|h| h.trim() == name);

        let picked: Vec<(String, usize)> = config
            .columns
            .iter()
            .filter_map(|c| index_of(c).map(|i| (c.clone(), i)))
            .collect();
        let date = index_of(&config.date_col);

        let mut keyed = vec![];
        for record in reader.records() {
            let record = record?;
            let sort_key = date
                .and_then(|i| record.get(i))
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());
            let row = picked
                .iter()
                .map(|(_, i)| {
                    let cell = record.get(*i).unwrap_or("").trim();
                    if cell.is_empty() {
                        EMPTY_CELL.to_string()
                    } else {
                        cell.to_string()
                    }
                })
                .collect::<Vec<_>>();
            keyed.push((sort_key, row));
        }

        // Stable, so rows sharing a date keep ledger order; undated rows go last.
        keyed.sort_by_key(|(d, _)| (d.is_none(), *d));

        Ok(Self {
            headers: picked.into_iter().map(|(h, _)| h).collect(),
            rows: keyed.into_iter().map(|(_, row)| row).collect(),
        })
    }
}

pub fn render(table: &Table, config: &PageConfig, generated_at: &str) -> Markup {
    let url_col = table.headers.iter().position(|h| h == &config.url_col);

    html! {
        (DOCTYPE)
        html lang="ko" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                link rel="stylesheet" href=(BOOTSTRAP_CSS);
                title { (config.title) }
            }
            body {
                div class="container-fluid py-4" {
                    h1 class="h3 mb-3" { (config.title) }
                    p class="text-muted" { "업데이트: " (generated_at) " · 총 " (table.rows.len()) "건" }
                    div class="table-responsive" {
                        table class="table table-striped table-hover align-middle" {
                            thead class="table-dark" {
                                tr {
                                    @for h in &table.headers {
                                        th scope="col" { (h) }
                                    }
                                }
                            }
                            tbody {
                                @for row in &table.rows {
                                    tr {
                                        @for (i, cell) in row.iter().enumerate() {
                                            @if Some(i) == url_col && cell != EMPTY_CELL {
                                                td { a href=(cell) target="_blank" rel="noopener" { "공고 보기" } }
                                            } @else {
                                                td style="white-space: pre-line" { (cell) }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Renders the ledger at `csv_path` into a static page at `out`.
pub fn generate(csv_path: &Path, out: &Path, config: &PageConfig) -> Result<usize, TrackerError> {
    let text = read_text(csv_path)?;
    let table = Table::from_csv_text(&text, config)?;
    let page = render(&table, config, &crate::utils::now_minutes());
    fs::write(out, page.into_string())?;
    info!("Rendered {} rows to {}", table.rows.len(), out.display());
    Ok(table.rows.len())
}
