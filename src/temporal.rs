//! Temporal heading classification.
//!
//! Headings such as `6050`, `6050-3-14`, `c. 1300` or `1066 – 1087` are
//! rewritten into labels (`Year 6050`, `Date 6050-3-14`, ...) that the
//! timeline extractor can find again after chunking.
//!
//! This is a recall-oriented heuristic, not a date parser: any purely
//! numeric heading (a catalog number, a model code) is labelled as a year.

use regex::Regex;
use std::sync::LazyLock;

static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(-\d+)*$").expect("numeric pattern is valid"));

const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ' '];

/// The kind of temporal heading recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    /// Title contains an en-dash or em-dash.
    YearRange,
    /// Title starts with `c.`.
    Circa,
    /// Dash-separated numeric groups, e.g. `6050-3-14`.
    Date,
    /// A bare number.
    Year,
}

/// Result of running a heading title through [`normalize_title`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTitle {
    pub kind: Option<TemporalKind>,
    pub text: String,
}

impl NormalizedTitle {
    pub fn is_temporal(&self) -> bool {
        self.kind.is_some()
    }

    /// Split into `(is_temporal, text)`.
    pub fn into_parts(self) -> (bool, String) {
        (self.kind.is_some(), self.text)
    }
}

/// Classify a heading title and produce its breadcrumb label.
pub fn normalize_title(title: &str) -> NormalizedTitle {
    if title.contains('\u{2013}') || title.contains('\u{2014}') {
        return temporal(TemporalKind::YearRange, format!("Years {}", title));
    }

    if let Some(rest) = title.strip_prefix("c.") {
        return temporal(TemporalKind::Circa, format!("circa Year {}", rest.trim()));
    }

    let cleaned = title.trim_end_matches(TRAILING_PUNCT);
    if NUMERIC_RE.is_match(cleaned) {
        return if cleaned.contains('-') {
            temporal(TemporalKind::Date, format!("Date {}", cleaned))
        } else {
            temporal(TemporalKind::Year, format!("Year {}", cleaned))
        };
    }

    NormalizedTitle {
        kind: None,
        text: title.to_string(),
    }
}

fn temporal(kind: TemporalKind, text: String) -> NormalizedTitle {
    NormalizedTitle {
        kind: Some(kind),
        text,
    }
}
