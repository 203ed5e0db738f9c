//! Stage 7: Footer/Total Extractor (spec §4.6). Emits the declared total by
//! matching total anchors and taking the rightmost amount on the anchor row
//! or the row after it. Also recovers a VAT/moms row (SPEC_FULL §10.2) as a
//! secondary reconciliation aid, never as a replacement for the total.

use crate::header::normalize_amount_row;
use crate::types::{FieldValue, InvoiceHeader, Row};

const TOTAL_ANCHORS: &[&str] = &["att betala", "summa", "total", "netto", "att betala totalt"];
const VAT_ANCHORS: &[&str] = &["moms", "vat", "mvsk"];

pub fn extract_footer(rows: &[Row], header: &mut InvoiceHeader) {
    for anchor in TOTAL_ANCHORS {
        if let Some((amount, trace)) = normalize_amount_row(rows, anchor) {
            header.total_amount = Some(FieldValue::new(amount, 0.85, trace));
            break;
        }
    }
    for anchor in VAT_ANCHORS {
        if let Some((amount, trace)) = normalize_amount_row(rows, anchor) {
            header.vat_amount = Some(FieldValue::new(amount, 0.7, trace));
            break;
        }
    }
}
