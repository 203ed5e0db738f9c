//! Stage 3: Segmenter (spec §4.2). Labels contiguous row ranges per page as
//! header/items/footer. Advisory only — extractors validate their own
//! content rather than trusting segment boundaries blindly.

use crate::types::{Row, Segment, SegmentKind};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TOTAL_ANCHORS: Vec<&'static str> =
        vec!["att betala", "summa", "total", "netto", "att betala totalt"];
    static ref COLUMN_HEADER_ANCHORS: Vec<&'static str> =
        vec!["antal", "á-pris", "a-pris", "pris", "belopp", "moms", "beskrivning", "artikel"];
    static ref NUMERIC_TOKEN: Regex = Regex::new(r"^-?\d[\d .,]*-?$").unwrap();
}

fn numeric_token_count(row: &Row) -> usize {
    row.tokens.iter().filter(|t| NUMERIC_TOKEN.is_match(&t.text)).count()
}

fn row_matches_any(row: &Row, anchors: &[&str]) -> bool {
    let text = row.text().to_lowercase();
    anchors.iter().any(|a| text.contains(a))
}

/// Segments one page's rows. `rows` must already be in top-to-bottom order.
pub fn segment_page(rows: &[Row], page_index: usize) -> Vec<Segment> {
    if rows.is_empty() {
        return Vec::new();
    }

    let items_start = rows
        .iter()
        .position(|r| numeric_token_count(r) >= 3 || row_matches_any(r, &COLUMN_HEADER_ANCHORS))
        .unwrap_or(rows.len());

    let footer_start = rows
        .iter()
        .enumerate()
        .skip(items_start)
        .position(|(_, r)| row_matches_any(r, &TOTAL_ANCHORS))
        .map(|p| p + items_start);

    let mut segments = Vec::new();

    if items_start > 0 {
        segments.push(Segment {
            kind: SegmentKind::Header,
            row_range: 0..items_start,
            page_index,
        });
    }

    let items_end = footer_start.unwrap_or(rows.len());
    if items_end > items_start {
        segments.push(Segment {
            kind: SegmentKind::Items,
            row_range: items_start..items_end,
            page_index,
        });
    }

    if let Some(footer_start) = footer_start {
        segments.push(Segment {
            kind: SegmentKind::Footer,
            row_range: footer_start..rows.len(),
            page_index,
        });
    }

    segments
}

/// True when this page produced no items rows at all (spec §4.2 edge case).
pub fn is_segment_empty(segments: &[Segment]) -> bool {
    !segments.iter().any(|s| s.kind == SegmentKind::Items)
}

/// Detects a page that looks like two complete invoices printed back to
/// back (SPEC_FULL §10.4, additive edge case): two disjoint total anchors
/// with an invoice-number header row between them. Actually splitting the
/// page into two invoices is out of scope; this only raises the signal so
/// the caller isn't handed a silently-merged result.
pub fn detect_split_page_suspected(rows: &[Row]) -> bool {
    let total_positions: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| row_matches_any(r, &TOTAL_ANCHORS))
        .map(|(i, _)| i)
        .collect();

    total_positions.windows(2).any(|pair| {
        let (first, second) = (pair[0], pair[1]);
        rows[(first + 1)..second]
            .iter()
            .any(|r| r.text().to_lowercase().contains("fakturanr"))
    })
}
