//! Heuristic merchant/total extraction from noisy OCR text.
//!
//! Both heuristics are order-sensitive; the exact scan windows, blacklist
//! and tie-breaks below are part of the observable behavior.

use crate::types::result::{ReceiptExtraction, UNKNOWN_MERCHANT};
use regex::Regex;
use std::sync::LazyLock;

/// Only the top of the receipt is searched for the merchant
const MERCHANT_SCAN_LINES: usize = 6;

/// Lines containing any of these (case-insensitive substring) are boilerplate
const MERCHANT_BLACKLIST: [&str; 6] = ["thank", "purchase", "visit", "welcome", "please", "receipt"];

/// Merchant lines must be longer than this many characters
const MERCHANT_MIN_LEN: usize = 3;

/// Any digit or dollar sign disqualifies a merchant line (amounts included)
static NUMERIC_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d|\$").expect("valid numeric marker regex"));

static NON_MERCHANT_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9 &]").expect("valid merchant charset regex"));

/// `digits.digits(2)`
static DECIMAL_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+\.[0-9]{2}").expect("valid amount regex"));

/// OCR output: raw text plus its trimmed, non-empty lines in page order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrText {
    raw: String,
    lines: Vec<String>,
}

impl OcrText {
    pub fn from_raw(raw: String) -> Self {
        let lines = raw
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { raw, lines }
    }

    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let raw = lines
            .iter()
            .map(|l| l.as_ref())
            .collect::<Vec<_>>()
            .join("\n");
        Self::from_raw(raw)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Pulls merchant name and total amount out of OCR text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &OcrText) -> ReceiptExtraction {
        ReceiptExtraction {
            merchant_name: self.merchant_name(text.lines()),
            total_amount: self.total_amount(text),
        }
    }

    /// First non-boilerplate, non-numeric line of the first six.
    pub fn merchant_name(&self, lines: &[String]) -> String {
        lines
            .iter()
            .take(MERCHANT_SCAN_LINES)
            .filter(|line| !is_boilerplate(line))
            .find(|line| {
                !NUMERIC_MARKER.is_match(line) && line.trim().chars().count() > MERCHANT_MIN_LEN
            })
            .map(|line| NON_MERCHANT_CHARS.replace_all(line, "").into_owned())
            .unwrap_or_else(|| UNKNOWN_MERCHANT.to_string())
    }

    /// Amount on the bottom-most "total" line, else the last amount anywhere.
    ///
    /// A total of exactly 0.00 also falls through to the whole-text scan.
    pub fn total_amount(&self, text: &OcrText) -> f64 {
        let from_total_line = text
            .lines()
            .iter()
            .rev()
            .filter(|line| line.to_lowercase().contains("total"))
            .find_map(|line| DECIMAL_AMOUNT.find(line))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);

        if from_total_line != 0.0 {
            return from_total_line;
        }

        DECIMAL_AMOUNT
            .find_iter(text.raw())
            .last()
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

fn is_boilerplate(line: &str) -> bool {
    let lower = line.to_lowercase();
    MERCHANT_BLACKLIST.iter().any(|word| lower.contains(word))
}
