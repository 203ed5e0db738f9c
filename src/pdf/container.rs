//! Classical-xref PDF container reader (SPEC_FULL §4.12). Scoped to what the
//! extraction pipeline needs: page enumeration, `/MediaBox`, and decoded
//! content streams. Falls back to a linear object scan ("recovery mode")
//! when the xref table does not resolve cleanly, which is common in
//! invoice-generator output.

use super::content::tokenize_content;
use super::object::{Lexer, Object};
use crate::error::PdfError;
use crate::types::{Document, Page};
use flate2::read::ZlibDecoder;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, warn};

const MIN_TOKENS_FOR_TEXT_LAYER: usize = 5;

pub struct PdfContainer {
    objects: HashMap<u32, Object>,
}

impl PdfContainer {
    #[tracing::instrument(skip(bytes))]
    pub fn load(bytes: &[u8]) -> Result<Document, PdfError> {
        if bytes.len() < 8 || &bytes[0..5] != b"%PDF-" {
            return Err(PdfError::InvalidHeader);
        }

        let mut container = PdfContainer {
            objects: HashMap::new(),
        };

        match container.load_via_xref(bytes) {
            Ok(()) if !container.objects.is_empty() => {}
            _ => {
                warn!("xref table unusable, falling back to linear object scan");
                container.scan_objects_linearly(bytes);
            }
        }

        if container.objects.is_empty() {
            return Err(PdfError::Unreadable("no objects recovered".into()));
        }

        let root = container.find_catalog()?;
        let pages_ref = root
            .get("Pages")
            .ok_or_else(|| PdfError::Unreadable("catalog has no /Pages".into()))?;
        let pages_dict = container
            .resolve(pages_ref)
            .ok_or_else(|| PdfError::Unreadable("/Pages does not resolve".into()))?;

        let mut leaves = Vec::new();
        container.collect_page_leaves(&pages_dict, None, &mut leaves, 0)?;

        if leaves.is_empty() {
            return Err(PdfError::Unreadable("no page leaves found".into()));
        }

        let pages = leaves
            .into_iter()
            .enumerate()
            .map(|(index, (dict, inherited_media_box))| container.build_page(index, &dict, inherited_media_box))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Document { pages })
    }

    fn load_via_xref(&mut self, bytes: &[u8]) -> Result<(), PdfError> {
        let tail_window = &bytes[bytes.len().saturating_sub(2048)..];
        let marker = b"startxref";
        let marker_pos = find_last(tail_window, marker)
            .ok_or_else(|| PdfError::Unreadable("startxref not found".into()))?;
        let after = &tail_window[marker_pos + marker.len()..];
        let offset: usize = std::str::from_utf8(after)
            .ok()
            .and_then(|s| s.split_whitespace().next())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PdfError::Unreadable("malformed startxref".into()))?;

        self.load_xref_section(bytes, offset)
    }

    fn load_xref_section(&mut self, bytes: &[u8], offset: usize) -> Result<(), PdfError> {
        if offset >= bytes.len() {
            return Err(PdfError::Unreadable("xref offset out of range".into()));
        }
        let mut lexer = Lexer::new(&bytes[offset..]);
        match lexer.next_lexeme() {
            super::object::Lexeme::Keyword(k) if k == "xref" => {}
            _ => return Err(PdfError::Unsupported("cross-reference stream (XRefStm)".into())),
        }
        let mut cursor = offset + lexer.pos();

        loop {
            let header_text = String::from_utf8_lossy(&bytes[cursor..(cursor + 40).min(bytes.len())]);
            let mut header_parts = header_text.split_whitespace();
            let (Some(start_str), Some(count_str)) = (header_parts.next(), header_parts.next()) else {
                break;
            };
            let (Ok(start), Ok(count)) = (start_str.parse::<u32>(), count_str.parse::<u32>()) else {
                break;
            };
            // Advance past "start count" plus its trailing EOL.
            let header_len = start_str.len() + 1 + count_str.len();
            cursor += header_len;
            while bytes.get(cursor).is_some_and(|b| b.is_ascii_whitespace()) {
                cursor += 1;
            }

            for i in 0..count {
                if cursor + 20 > bytes.len() {
                    break;
                }
                let entry = String::from_utf8_lossy(&bytes[cursor..cursor + 20]);
                let mut parts = entry.split_whitespace();
                let obj_offset: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let _gen: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let kind = parts.next().unwrap_or("f");
                if kind == "n" {
                    if let Some(obj) = self.parse_object_at(bytes, obj_offset) {
                        self.objects.insert(start + i, obj);
                    }
                }
                cursor += 20;
            }
        }

        let mut lexer = Lexer::new(&bytes[cursor..]);
        match lexer.next_lexeme() {
            super::object::Lexeme::Keyword(k) if k == "trailer" => {}
            _ => return Ok(()),
        }
        let trailer = lexer
            .parse_object()
            .ok_or_else(|| PdfError::Unreadable("malformed trailer".into()))?;
        if let Some(dict) = trailer.as_dict() {
            if let Some(prev) = dict.get("Prev").and_then(Object::as_f64) {
                let _ = self.load_xref_section(bytes, prev as usize);
            }
        }
        Ok(())
    }

    fn parse_object_at(&self, bytes: &[u8], offset: usize) -> Option<Object> {
        if offset >= bytes.len() {
            return None;
        }
        let mut lexer = Lexer::new(&bytes[offset..]);
        // "N G obj" header.
        let _num = lexer.next_lexeme();
        let _gen = lexer.next_lexeme();
        match lexer.next_lexeme() {
            super::object::Lexeme::Keyword(k) if k == "obj" => {}
            _ => return None,
        }
        lexer.parse_object()
    }

    /// Recovery mode: scan the whole file for `N G obj` headers.
    fn scan_objects_linearly(&mut self, bytes: &[u8]) {
        let marker = b" obj";
        let mut search_from = 0usize;
        while let Some(rel) = find_from(bytes, marker, search_from) {
            search_from = rel + marker.len();
            let pre = &bytes[..rel];
            let mut split = pre
                .iter()
                .rev()
                .take_while(|b| !b.is_ascii_whitespace())
                .count();
            let gen_start = rel.saturating_sub(split);
            split = pre[..gen_start]
                .iter()
                .rev()
                .skip_while(|b| b.is_ascii_whitespace())
                .take_while(|b| b.is_ascii_digit())
                .count();
            let num_start = gen_start.saturating_sub(split.max(1));
            let num_text = String::from_utf8_lossy(&bytes[num_start..gen_start]);
            let Ok(num) = num_text.trim().parse::<u32>() else {
                continue;
            };
            if let Some(obj) = self.parse_object_at(bytes, num_start) {
                self.objects.insert(num, obj);
            }
        }
    }

    fn resolve(&self, obj: &Object) -> Option<Object> {
        match obj {
            Object::Reference(n, _) => self.objects.get(n).cloned(),
            other => Some(other.clone()),
        }
    }

    fn find_catalog(&self) -> Result<HashMap<String, Object>, PdfError> {
        for obj in self.objects.values() {
            if let Object::Dictionary(d) = obj {
                if d.get("Type").and_then(Object::as_name) == Some("Catalog") {
                    return Ok(d.clone());
                }
            }
        }
        Err(PdfError::Unreadable("no /Catalog object found".into()))
    }

    fn collect_page_leaves(
        &self,
        node: &Object,
        inherited_media_box: Option<[f64; 4]>,
        out: &mut Vec<(HashMap<String, Object>, Option<[f64; 4]>)>,
        depth: usize,
    ) -> Result<(), PdfError> {
        if depth > 64 {
            return Err(PdfError::Unreadable("page tree recursion too deep".into()));
        }
        let Some(dict) = node.as_dict() else {
            return Ok(());
        };
        let media_box = dict
            .get("MediaBox")
            .and_then(Object::as_array)
            .map(|a| {
                let v: Vec<f64> = a.iter().filter_map(Object::as_f64).collect();
                [v[0], v[1], v[2], v[3]]
            })
            .or(inherited_media_box);

        match dict.get("Type").and_then(Object::as_name) {
            Some("Pages") => {
                let kids = dict
                    .get("Kids")
                    .and_then(Object::as_array)
                    .ok_or_else(|| PdfError::Unreadable("/Pages has no /Kids".into()))?;
                for kid in kids {
                    let Some(resolved) = self.resolve(kid) else {
                        continue;
                    };
                    self.collect_page_leaves(&resolved, media_box, out, depth + 1)?;
                }
            }
            _ => out.push((dict.clone(), media_box)),
        }
        Ok(())
    }

    fn build_page(
        &self,
        index: usize,
        dict: &HashMap<String, Object>,
        inherited_media_box: Option<[f64; 4]>,
    ) -> Result<Page, PdfError> {
        let media_box = dict
            .get("MediaBox")
            .and_then(Object::as_array)
            .map(|a| {
                let v: Vec<f64> = a.iter().filter_map(Object::as_f64).collect();
                [v[0], v[1], v[2], v[3]]
            })
            .or(inherited_media_box)
            .unwrap_or([0.0, 0.0, 595.0, 842.0]);

        let mut content_bytes = Vec::new();
        if let Some(contents) = dict.get("Contents") {
            match self.resolve(contents) {
                Some(Object::Stream(stream_dict, body)) => {
                    content_bytes.extend(decode_stream(&stream_dict, &body));
                }
                Some(Object::Array(parts)) => {
                    for part in parts {
                        if let Some(Object::Stream(stream_dict, body)) = self.resolve(&part) {
                            content_bytes.extend(decode_stream(&stream_dict, &body));
                            content_bytes.push(b'\n');
                        }
                    }
                }
                _ => {}
            }
        }

        let tokens = tokenize_content(&content_bytes, index);
        let text_quality = estimate_text_quality(&tokens);
        let text_layer_used = tokens.len() >= MIN_TOKENS_FOR_TEXT_LAYER;
        debug!(page = index, tokens = tokens.len(), text_quality, "page decoded");

        Ok(Page {
            index,
            media_box: crate::types::BoundingBox {
                x: media_box[0] as f32,
                y: media_box[1] as f32,
                width: (media_box[2] - media_box[0]) as f32,
                height: (media_box[3] - media_box[1]) as f32,
            },
            tokens,
            text_layer_used,
            text_quality,
            requires_ocr: !text_layer_used,
            raster: None,
        })
    }
}

fn decode_stream(dict: &HashMap<String, Object>, body: &[u8]) -> Vec<u8> {
    let is_flate = match dict.get("Filter") {
        Some(Object::Name(n)) => n == "FlateDecode",
        Some(Object::Array(a)) => a.iter().any(|o| o.as_name() == Some("FlateDecode")),
        _ => false,
    };
    if !is_flate {
        return body.to_vec();
    }
    let mut decoder = ZlibDecoder::new(body);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => out,
        Err(_) => Vec::new(),
    }
}

fn estimate_text_quality(tokens: &[crate::types::Token]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let plausible = tokens
        .iter()
        .filter(|t| t.text.chars().all(|c| c.is_ascii() || (c as u32) < 0x250))
        .count();
    plausible as f64 / tokens.len() as f64
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
