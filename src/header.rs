//! Stage 5: Header Extractor (spec §4.6). Scans the header segment for
//! labeled fields using ordered anchor lists; confidence is the product of
//! anchor presence, value-format match, and a positional prior.

use crate::normalize::normalize;
use crate::types::{BoundingBox, FieldValue, InvoiceHeader, Row, Traceability};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref INVOICE_NO_LABELS: Vec<&'static str> =
        vec!["fakturanr", "faktura nr", "invoice no", "invoice number"];
    static ref SUPPLIER_LABELS: Vec<&'static str> = vec!["säljare", "leverantör", "supplier", "from"];
    static ref DATE_LABELS: Vec<&'static str> = vec!["fakturadatum", "datum", "invoice date", "date"];
    static ref CURRENCY_LABELS: Vec<&'static str> = vec!["valuta", "currency"];
    static ref INVOICE_NO_VALUE: Regex = Regex::new(r"[A-Za-z0-9/-]{4,20}").unwrap();
    static ref ISO_DATE: Regex = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap();
    static ref SLASH_DATE: Regex = Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap();
    static ref CURRENCY_CODE: Regex = Regex::new(r"(?i)\b(SEK|EUR|USD|NOK|DKK)\b").unwrap();
}

fn row_trace(row: &Row) -> Option<Traceability> {
    row.bbox().map(|bbox| Traceability { page_index: row.page_index, bbox })
}

fn find_labeled_value<'a>(rows: &'a [Row], labels: &[&str]) -> Option<(&'a Row, usize, usize)> {
    for row in rows {
        let text = row.text();
        let lower = text.to_lowercase();
        if let Some((pos, len)) = labels.iter().find_map(|l| lower.find(l).map(|p| (p, l.len()))) {
            return Some((row, pos, len));
        }
    }
    None
}

fn extract_invoice_number(rows: &[Row]) -> Option<FieldValue<String>> {
    let (row, pos, len) = find_labeled_value(rows, &INVOICE_NO_LABELS)?;
    let text = row.text();
    let after = &text[(pos + len).min(text.len())..];
    let m = INVOICE_NO_VALUE.find(after)?;
    let format_ok = m.as_str().chars().any(|c| c.is_ascii_digit());
    let confidence = 0.6 + if format_ok { 0.3 } else { 0.0 };
    Some(FieldValue::new(m.as_str().to_string(), confidence, row_trace(row)))
}

fn extract_supplier(rows: &[Row]) -> Option<FieldValue<String>> {
    if let Some((row, pos, len)) = find_labeled_value(rows, &SUPPLIER_LABELS) {
        let text = row.text();
        let value = text[(pos + len).min(text.len())..].trim().trim_start_matches(':').trim();
        if !value.is_empty() {
            return Some(FieldValue::new(value.to_string(), 0.85, row_trace(row)));
        }
    }
    // No explicit label: the first non-empty header row is conventionally
    // the supplier's letterhead line.
    let first = rows.iter().find(|r| !r.text().trim().is_empty())?;
    Some(FieldValue::new(first.text().trim().to_string(), 0.4, row_trace(first)))
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE.captures(text) {
        let y: i32 = caps[1].parse().ok()?;
        let m: u32 = caps[2].parse().ok()?;
        let d: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    if let Some(caps) = SLASH_DATE.captures(text) {
        let d: u32 = caps[1].parse().ok()?;
        let m: u32 = caps[2].parse().ok()?;
        let y: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    None
}

fn extract_date(rows: &[Row]) -> Option<FieldValue<NaiveDate>> {
    if let Some((row, pos, _len)) = find_labeled_value(rows, &DATE_LABELS) {
        let text = row.text();
        if let Some(date) = parse_date_text(&text[pos..]) {
            return Some(FieldValue::new(date, 0.9, row_trace(row)));
        }
    }
    for row in rows {
        let text = row.text();
        if let Some(date) = parse_date_text(&text) {
            return Some(FieldValue::new(date, 0.5, row_trace(row)));
        }
    }
    None
}

fn extract_currency(rows: &[Row]) -> Option<FieldValue<String>> {
    if let Some((row, pos, len)) = find_labeled_value(rows, &CURRENCY_LABELS) {
        let text = row.text();
        let after = &text[(pos + len).min(text.len())..];
        if let Some(m) = CURRENCY_CODE.find(after) {
            return Some(FieldValue::new(m.as_str().to_uppercase(), 0.9, row_trace(row)));
        }
    }
    for row in rows {
        let text = row.text();
        if let Some(m) = CURRENCY_CODE.find(&text) {
            return Some(FieldValue::new(m.as_str().to_uppercase(), 0.7, row_trace(row)));
        }
        if text.contains("kr") {
            return Some(FieldValue::new("SEK".to_string(), 0.5, row_trace(row)));
        }
    }
    // Default per SPEC_FULL §10.1: Swedish-domain default with a confidence
    // penalty when no explicit currency evidence was found on the page.
    None
}

pub fn extract_header(rows: &[Row]) -> InvoiceHeader {
    let currency = extract_currency(rows).or_else(|| {
        Some(FieldValue::new("SEK".to_string(), 0.3, None))
    });
    InvoiceHeader {
        invoice_number: extract_invoice_number(rows),
        supplier: extract_supplier(rows),
        date: extract_date(rows),
        currency,
        total_amount: None,
        vat_amount: None,
    }
}

pub fn normalize_amount_row(rows: &[Row], anchor: &str) -> Option<(rust_decimal::Decimal, Option<Traceability>)> {
    for (i, row) in rows.iter().enumerate() {
        let text = row.text().to_lowercase();
        if text.contains(anchor) {
            let candidate_row = rows.get(i).filter(|r| has_amount_token(r)).or_else(|| rows.get(i + 1));
            if let Some(candidate_row) = candidate_row {
                if let Some(tok) = candidate_row.tokens.iter().rev().find(|t| has_amount_text(&t.text)) {
                    if let Ok(amount) = normalize(&tok.text) {
                        return Some((
                            amount,
                            Some(Traceability {
                                page_index: candidate_row.page_index,
                                bbox: BoundingBox { x: tok.x, y: tok.y, width: tok.width, height: tok.height },
                            }),
                        ));
                    }
                }
            }
        }
    }
    None
}

fn has_amount_token(row: &Row) -> bool {
    row.tokens.iter().any(|t| has_amount_text(&t.text))
}

fn has_amount_text(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}
