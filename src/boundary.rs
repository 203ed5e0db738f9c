//! Stage 4: Boundary Detector (spec §4.3). Groups pages into invoices
//! without ever consulting totals (P3) — only invoice-number anchors,
//! page-numbering continuity, and header fingerprints are considered.

use crate::types::{BoundaryDecision, BoundarySource, InvoiceGroup, Row};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "Ordernr"/"Kundnr"/"OCR-nr" are blacklisted by omission: they are never
    // in this label list, so a row bearing only those labels yields no
    // invoice_no candidate even if it sits right next to a plausible value.
    static ref INVOICE_NO_LABELS: Vec<&'static str> =
        vec!["fakturanr", "faktura nr", "invoice no", "invoice number"];
    static ref INVOICE_NO_VALUE: Regex = Regex::new(r"[A-Za-z0-9/-]{4,20}").unwrap();
    static ref PAGE_NO_PATTERN: Regex =
        Regex::new(r"(?i)(?:sida|page)?\s*(\d+)\s*(?:/|av|of)\s*(\d+)").unwrap();
}

#[derive(Debug, Clone)]
struct PageSignals {
    invoice_no: Option<String>,
    page_no: Option<(u32, u32)>,
    header_fingerprint: String,
}

/// A page's supplier/date/currency header fingerprint, used only as a last
/// resort when neither invoice_no nor page numbering is available.
pub fn header_fingerprint(header_rows: &[Row]) -> String {
    header_rows
        .iter()
        .map(|r| r.text().to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

fn extract_invoice_no(header_rows: &[Row]) -> Option<String> {
    for row in header_rows {
        let text = row.text();
        let lower = text.to_lowercase();
        let Some((pos, len)) = INVOICE_NO_LABELS
            .iter()
            .find_map(|l| lower.find(l).map(|p| (p, l.len())))
        else {
            continue;
        };
        let after = &text[(pos + len).min(text.len())..];
        if let Some(m) = INVOICE_NO_VALUE.find(after) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

fn extract_page_no(rows: &[Row]) -> Option<(u32, u32)> {
    for row in rows {
        let text = row.text();
        if let Some(caps) = PAGE_NO_PATTERN.captures(&text) {
            let n: u32 = caps.get(1)?.as_str().parse().ok()?;
            let m: u32 = caps.get(2)?.as_str().parse().ok()?;
            return Some((n, m));
        }
    }
    None
}

/// OCR-robust comparison: treats O/0 and I/1 as equivalent and tolerates a
/// single character edit (spec §4.3).
fn invoice_no_matches(a: &str, b: &str) -> bool {
    let norm = |s: &str| -> String {
        s.to_uppercase()
            .chars()
            .map(|c| match c {
                'O' => '0',
                'I' | 'L' => '1',
                other => other,
            })
            .collect()
    };
    let (na, nb) = (norm(a), norm(b));
    if na == nb {
        return true;
    }
    edit_distance_at_most_one(&na, &nb)
}

fn edit_distance_at_most_one(a: &str, b: &str) -> bool {
    let (a, b): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
    if a.len().abs_diff(b.len()) > 1 {
        return false;
    }
    if a.len() == b.len() {
        return a.iter().zip(&b).filter(|(x, y)| x != y).count() <= 1;
    }
    let (shorter, longer) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    let mut i = 0;
    let mut j = 0;
    let mut skipped = false;
    while i < shorter.len() && j < longer.len() {
        if shorter[i] == longer[j] {
            i += 1;
            j += 1;
        } else if !skipped {
            skipped = true;
            j += 1;
        } else {
            return false;
        }
    }
    true
}

/// Groups all pages of a document into invoices. `page_header_rows[i]` is
/// the header-segment rows for page `i` (spec §4.2); `page_all_rows[i]` is
/// every row on page `i`, used for page-number scanning which may appear
/// in the footer.
pub fn detect_boundaries(
    page_header_rows: &[Vec<Row>],
    page_all_rows: &[Vec<Row>],
) -> (Vec<InvoiceGroup>, Vec<BoundaryDecision>) {
    let page_count = page_header_rows.len();
    let mut signals = Vec::with_capacity(page_count);
    for i in 0..page_count {
        signals.push(PageSignals {
            invoice_no: extract_invoice_no(&page_header_rows[i]),
            page_no: extract_page_no(&page_all_rows[i]),
            header_fingerprint: header_fingerprint(&page_header_rows[i]),
        });
    }

    let mut groups: Vec<InvoiceGroup> = Vec::new();
    let mut log = Vec::new();
    let mut current_pages: Vec<usize> = Vec::new();
    let mut current_invoice_no: Option<String> = None;
    let mut current_source = BoundarySource::HeaderFingerprint;
    let mut current_fingerprint = String::new();
    let mut current_page_no: Option<(u32, u32)> = None;

    let mut close_group = |pages: &mut Vec<usize>,
                           invoice_no: &mut Option<String>,
                           source: BoundarySource,
                           groups: &mut Vec<InvoiceGroup>| {
        if !pages.is_empty() {
            groups.push(InvoiceGroup {
                pages: std::mem::take(pages),
                invoice_no: invoice_no.take(),
                source,
            });
        }
    };

    for (i, sig) in signals.iter().enumerate() {
        let mut reasons = Vec::new();
        let decision;

        if let Some(ref candidate) = sig.invoice_no {
            let matches_active = current_invoice_no
                .as_ref()
                .is_some_and(|active| invoice_no_matches(active, candidate));

            if current_invoice_no.is_some() && !matches_active {
                let previous_page_no = current_page_no;
                close_group(&mut current_pages, &mut current_invoice_no, current_source, &mut groups);
                current_pages.push(i);
                current_invoice_no = Some(candidate.clone());
                current_source = BoundarySource::InvoiceNo;
                current_fingerprint = sig.header_fingerprint.clone();
                current_page_no = sig.page_no;
                decision = "new_invoice";
                reasons.push("invoice_no_change".to_string());

                // A conflicting signal: the invoice_no says "new invoice"
                // but page numbering still looked like a continuation.
                if let (Some((n, m)), Some((prev_n, prev_m))) = (sig.page_no, previous_page_no) {
                    if n == prev_n + 1 && m == prev_m {
                        reasons.push("risk: page_no_conflict".to_string());
                    }
                }
            } else {
                if current_invoice_no.is_none() {
                    current_invoice_no = Some(candidate.clone());
                    current_source = BoundarySource::InvoiceNo;
                }
                current_pages.push(i);
                current_fingerprint = sig.header_fingerprint.clone();
                current_page_no = sig.page_no;
                decision = "continue_group";
                reasons.push("invoice_no_match".to_string());
            }
        } else if let (Some((n, m)), Some((prev_n, prev_m))) = (sig.page_no, current_page_no) {
            if n == prev_n + 1 && m == prev_m && !current_pages.is_empty() {
                current_pages.push(i);
                current_page_no = sig.page_no;
                decision = "continue_group";
                reasons.push("page_no_sequential".to_string());
            } else if n == 1 {
                close_group(&mut current_pages, &mut current_invoice_no, current_source, &mut groups);
                current_pages.push(i);
                current_source = BoundarySource::PageNumbering;
                current_fingerprint = sig.header_fingerprint.clone();
                current_page_no = sig.page_no;
                decision = "new_invoice";
                reasons.push("page_no_restart".to_string());
            } else {
                close_group(&mut current_pages, &mut current_invoice_no, current_source, &mut groups);
                current_pages.push(i);
                current_source = BoundarySource::PageNumbering;
                current_fingerprint = sig.header_fingerprint.clone();
                current_page_no = sig.page_no;
                decision = "new_invoice";
                reasons.push("page_no_unmatched".to_string());
            }
        } else if let Some((n, _m)) = sig.page_no {
            if n == 1 || current_pages.is_empty() {
                close_group(&mut current_pages, &mut current_invoice_no, current_source, &mut groups);
                current_pages.push(i);
                current_source = BoundarySource::PageNumbering;
                current_fingerprint = sig.header_fingerprint.clone();
                current_page_no = sig.page_no;
                decision = "new_invoice";
                reasons.push("page_no_restart".to_string());
            } else {
                current_pages.push(i);
                current_page_no = sig.page_no;
                decision = "continue_group";
                reasons.push("page_no_info_only".to_string());
            }
        } else if !current_pages.is_empty() && current_fingerprint == sig.header_fingerprint {
            current_pages.push(i);
            decision = "continue_group";
            reasons.push("header_fingerprint_match".to_string());
        } else {
            close_group(&mut current_pages, &mut current_invoice_no, current_source, &mut groups);
            current_pages.push(i);
            current_source = BoundarySource::HeaderFingerprint;
            current_fingerprint = sig.header_fingerprint.clone();
            current_page_no = sig.page_no;
            decision = "new_invoice";
            reasons.push("no_signal_fallback".to_string());
        }

        log.push(BoundaryDecision {
            page_index: i,
            decision: decision.to_string(),
            reasons,
        });
    }

    close_group(&mut current_pages, &mut current_invoice_no, current_source, &mut groups);

    (groups, log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Token;

    fn row(text: &str) -> Row {
        Row {
            tokens: vec![Token { text: text.into(), x: 0.0, y: 0.0, width: 10.0, height: 10.0, page_index: 0 }],
            baseline_y: 0.0,
            page_index: 0,
        }
    }

    #[test]
    fn two_invoices_via_invoice_no_and_page_numbering() {
        let headers = vec![
            vec![row("Fakturanr 6789"), row("Sida 1/2")],
            vec![row("Sida 2/2")],
            vec![row("Fakturanr 1234"), row("Sida 1/2")],
            vec![row("Sida 2/2")],
        ];
        let all = headers.clone();
        let (groups, _log) = detect_boundaries(&headers, &all);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].pages, vec![0, 1]);
        assert_eq!(groups[1].pages, vec![2, 3]);
    }

    #[test]
    fn ordernr_is_blacklisted_in_favor_of_fakturanr() {
        let headers = vec![vec![row("Ordernr 12345"), row("Fakturanr 6789")]];
        let (groups, _log) = detect_boundaries(&headers, &headers);
        assert_eq!(groups[0].invoice_no.as_deref(), Some("6789"));
    }

    #[test]
    fn boundary_ignores_totals_entirely() {
        // No total-related text appears anywhere in the header rows used;
        // demonstrates the detector needs nothing beyond invoice_no/page_no.
        let headers = vec![vec![row("Fakturanr 1")], vec![row("Fakturanr 2")]];
        let (groups, _log) = detect_boundaries(&headers, &headers);
        assert_eq!(groups.len(), 2);
    }
}
