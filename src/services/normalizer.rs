//! Turns the recognition engine's tabular output into normalized, reading-order words.
//!
//! The engine prints one row per layout element with twelve tab-separated columns:
//! `level page_num block_num par_num line_num word_num left top width height conf text`.
//! Level 1 is the page, level 5 a word. Only the page row (for the pixel size) and
//! non-empty word rows are used; the engine's own block/paragraph/line numbering is
//! ignored and lines are rebuilt from estimated baselines instead.

use crate::models::geometry::Rect;
use crate::models::ocr::{Code, PageSize, Word};
use crate::services::codes::DetectedSymbol;

const TSV_COLUMNS: usize = 12;
const PAGE_LEVEL: u8 = 1;
const WORD_LEVEL: u8 = 5;

/// Maximum baseline distance (normalized units) for two words to share a line.
pub const BASELINE_TOLERANCE: f64 = 0.0025;

/// Fraction of the box height taken up by descenders.
pub const DESCENDER_RATIO: f64 = 0.23;

/// Characters that reach below the baseline.
const DESCENDERS: &str = "gjpqyçģķļņŗąęįųșşțţ,;_()[]{}|@$µƒ§";

/// Words of one page plus the page size they were normalized against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedText {
    pub page: Option<PageSize>,
    pub words: Vec<Word>,
}

struct WordRow<'a> {
    bounds: Rect,
    confidence: f64,
    text: &'a str,
}

/// Parse, normalize and order the engine's tabular output.
///
/// Empty output (or a header alone) yields no words. Word rows without a page row
/// are a parse error, since there is nothing to normalize against.
pub fn normalize_tsv(tsv: &str) -> Result<NormalizedText, ParseError> {
    let mut page: Option<PageSize> = None;
    let mut rows = Vec::new();

    let mut seen_first = false;
    for (index, raw) in tsv.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if !seen_first {
            seen_first = true;
            if line.starts_with("level") {
                continue;
            }
        }

        let fields: Vec<&str> = line.splitn(TSV_COLUMNS, '\t').collect();
        // The text column is absent on some non-word rows.
        if fields.len() < TSV_COLUMNS - 1 {
            return Err(ParseError::ColumnCount {
                line: line_no,
                found: fields.len(),
            });
        }

        let level: u8 = fields[0].trim().parse().map_err(|_| ParseError::InvalidNumber {
            line: line_no,
            column: "level",
        })?;

        match level {
            PAGE_LEVEL if page.is_none() => {
                let width = parse_number(fields[8], line_no, "width")?;
                let height = parse_number(fields[9], line_no, "height")?;
                page = Some(
                    PageSize::new(width as u32, height as u32)
                        .ok_or(ParseError::InvalidPageSize { line: line_no })?,
                );
            }
            WORD_LEVEL => {
                let text = fields.get(11).copied().unwrap_or("").trim();
                if text.is_empty() {
                    continue;
                }
                let bounds = Rect::new(
                    parse_number(fields[6], line_no, "left")?,
                    parse_number(fields[7], line_no, "top")?,
                    parse_number(fields[8], line_no, "width")?,
                    parse_number(fields[9], line_no, "height")?,
                );
                let confidence = parse_number(fields[10], line_no, "conf")?;
                rows.push(WordRow {
                    bounds,
                    confidence,
                    text,
                });
            }
            _ => {}
        }
    }

    if rows.is_empty() {
        return Ok(NormalizedText {
            page,
            words: Vec::new(),
        });
    }
    let page = page.ok_or(ParseError::MissingPage)?;
    let (page_w, page_h) = (f64::from(page.width), f64::from(page.height));

    let words = rows
        .into_iter()
        .map(|row| {
            let bounds = clamp_to_page(row.bounds.scaled(page_w, page_h));
            Word {
                id: String::new(),
                baseline: estimate_baseline(&bounds, row.text),
                bounds,
                text: row.text.to_string(),
                confidence: (row.confidence / 100.0).clamp(0.0, 1.0),
            }
        })
        .collect();

    let mut words = reading_order(words);
    for (i, word) in words.iter_mut().enumerate() {
        word.id = format!("word-{}", i);
    }

    Ok(NormalizedText {
        page: Some(page),
        words,
    })
}

fn parse_number(field: &str, line: usize, column: &'static str) -> Result<f64, ParseError> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(ParseError::InvalidNumber { line, column })
}

fn clamp_to_page(rect: Rect) -> Rect {
    let left = rect.left.clamp(0.0, 1.0);
    let top = rect.top.clamp(0.0, 1.0);
    Rect::new(
        left,
        top,
        rect.width.clamp(0.0, 1.0 - left),
        rect.height.clamp(0.0, 1.0 - top),
    )
}

pub fn has_descender(text: &str) -> bool {
    text.chars().any(|c| DESCENDERS.contains(c))
}

/// Approximate where the word sits on its line. The engine reports no typographic
/// baseline, so words with a descender are assumed to extend 23% below it.
pub fn estimate_baseline(bounds: &Rect, text: &str) -> f64 {
    if has_descender(text) {
        bounds.top + bounds.height * (1.0 - DESCENDER_RATIO)
    } else {
        bounds.bottom()
    }
}

/// Rebuild top-to-bottom, left-to-right order from baselines.
///
/// Each word joins the first line whose *first* word lies within
/// [`BASELINE_TOLERANCE`], otherwise it starts a new line. Lines are ordered by
/// mean baseline and words within a line by their left edge. Both sorts are
/// stable, so exact ties keep engine order.
pub fn reading_order(words: Vec<Word>) -> Vec<Word> {
    let mut lines: Vec<Vec<Word>> = Vec::new();
    for word in words {
        let line = lines
            .iter_mut()
            .find(|line| (line[0].baseline - word.baseline).abs() <= BASELINE_TOLERANCE);
        match line {
            Some(line) => line.push(word),
            None => lines.push(vec![word]),
        }
    }

    let mut keyed: Vec<(f64, Vec<Word>)> = lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.bounds.left.total_cmp(&b.bounds.left));
            let mean = line.iter().map(|w| w.baseline).sum::<f64>() / line.len() as f64;
            (mean, line)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));

    keyed.into_iter().flat_map(|(_, line)| line).collect()
}

/// Convert decoded symbols into result codes.
///
/// With a reference size the boxes are normalized like words; without one they
/// stay in pixel units.
pub fn normalize_codes(symbols: Vec<DetectedSymbol>, reference: Option<PageSize>) -> Vec<Code> {
    symbols
        .into_iter()
        .enumerate()
        .map(|(i, symbol)| {
            let code_type = symbol.code_type();
            let bounds = match reference {
                Some(page) => symbol
                    .bounds
                    .scaled(f64::from(page.width), f64::from(page.height)),
                None => symbol.bounds,
            };
            Code {
                id: format!("code-{}", i),
                bounds,
                content: symbol.content,
                code_type,
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("Line {line}: expected 12 tab-separated columns, found {found}")]
    ColumnCount { line: usize, found: usize },

    #[error("Line {line}: invalid value in column '{column}'")]
    InvalidNumber { line: usize, column: &'static str },

    #[error("Line {line}: page row has zero width or height")]
    InvalidPageSize { line: usize },

    #[error("Word rows present but no page row to normalize against")]
    MissingPage,
}
