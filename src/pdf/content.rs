//! Content-stream operator parser (SPEC_FULL §4.12), scoped to the
//! text-showing and text-positioning operators layout reconstruction needs.
//! Path/color/image/shading operators are consumed and discarded rather than
//! treated as errors — drawing noise around an invoice table is normal.

use super::object::{Lexeme, Lexer, Object};
use crate::types::Token;

#[derive(Debug, Clone, Copy)]
struct TextState {
    font_size: f32,
    /// Text line matrix, as `[a, b, c, d, e, f]`.
    matrix: [f32; 6],
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            font_size: 0.0,
            matrix: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        }
    }
}

fn apply_translate(m: [f32; 6], tx: f32, ty: f32) -> [f32; 6] {
    [
        m[0],
        m[1],
        m[2],
        m[3],
        tx * m[0] + ty * m[2] + m[4],
        tx * m[1] + ty * m[3] + m[5],
    ]
}

/// Decodes a content stream into positioned glyph-run tokens. Best-effort:
/// an operator this parser does not model is skipped along with its
/// operands rather than aborting the page.
pub fn tokenize_content(content: &[u8], page_index: usize) -> Vec<Token> {
    let mut lexer = Lexer::new(content);
    let mut operands: Vec<Object> = Vec::new();
    let mut tokens = Vec::new();
    let mut state = TextState::default();
    let mut in_text_object = false;
    let mut pending_font_size = 10.0f32;

    loop {
        let checkpoint = lexer.pos();
        let lex = lexer.next_lexeme();
        match lex {
            Lexeme::Eof => break,
            Lexeme::Keyword(ref op) => {
                match op.as_str() {
                    "BT" => {
                        in_text_object = true;
                        state.matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
                    }
                    "ET" => in_text_object = false,
                    "Tf" => {
                        if let Some(size) = operands.last().and_then(Object::as_f64) {
                            pending_font_size = size as f32;
                        }
                    }
                    "Td" | "TD" => {
                        if let [tx, ty] = take_f32_pair(&operands) {
                            state.matrix = apply_translate(state.matrix, tx, ty);
                        }
                    }
                    "Tm" => {
                        if operands.len() >= 6 {
                            let vals: Vec<f32> = operands
                                .iter()
                                .rev()
                                .take(6)
                                .rev()
                                .filter_map(Object::as_f64)
                                .map(|v| v as f32)
                                .collect();
                            if vals.len() == 6 {
                                state.matrix = [vals[0], vals[1], vals[2], vals[3], vals[4], vals[5]];
                            }
                        }
                    }
                    "T*" => {
                        state.matrix = apply_translate(state.matrix, 0.0, -pending_font_size * 1.15);
                    }
                    "Tj" => {
                        if in_text_object {
                            if let Some(Object::String(bytes)) = operands.last() {
                                push_text_token(&mut tokens, bytes, &state, pending_font_size, page_index);
                            }
                        }
                    }
                    "'" => {
                        state.matrix = apply_translate(state.matrix, 0.0, -pending_font_size * 1.15);
                        if in_text_object {
                            if let Some(Object::String(bytes)) = operands.last() {
                                push_text_token(&mut tokens, bytes, &state, pending_font_size, page_index);
                            }
                        }
                    }
                    "\"" => {
                        state.matrix = apply_translate(state.matrix, 0.0, -pending_font_size * 1.15);
                        if in_text_object {
                            if let Some(Object::String(bytes)) = operands.last() {
                                push_text_token(&mut tokens, bytes, &state, pending_font_size, page_index);
                            }
                        }
                    }
                    "TJ" => {
                        if in_text_object {
                            if let Some(Object::Array(items)) = operands.last() {
                                for item in items {
                                    match item {
                                        Object::String(bytes) => {
                                            push_text_token(&mut tokens, bytes, &state, pending_font_size, page_index);
                                            let advance = bytes.len() as f32 * pending_font_size * 0.5;
                                            state.matrix = apply_translate(state.matrix, advance, 0.0);
                                        }
                                        Object::Integer(n) => {
                                            let shift = -(*n as f32) / 1000.0 * pending_font_size;
                                            state.matrix = apply_translate(state.matrix, shift, 0.0);
                                        }
                                        Object::Real(n) => {
                                            let shift = -(*n) / 1000.0 * pending_font_size;
                                            state.matrix = apply_translate(state.matrix, shift, 0.0);
                                        }
                                        _ => {}
                                    }
                                }
                            }
                        }
                    }
                    _ => {} // paths, color, images, XObjects, clipping: discarded.
                }
                operands.clear();
            }
            _ => {
                if let Some(obj) = reparse_operand(&mut lexer, lex, checkpoint) {
                    operands.push(obj);
                }
            }
        }
    }

    tokens
}

fn take_f32_pair(operands: &[Object]) -> [f32; 2] {
    let vals: Vec<f32> = operands
        .iter()
        .rev()
        .take(2)
        .rev()
        .filter_map(Object::as_f64)
        .map(|v| v as f32)
        .collect();
    if vals.len() == 2 {
        [vals[0], vals[1]]
    } else {
        [0.0, 0.0]
    }
}

fn reparse_operand(lexer: &mut Lexer, lex: Lexeme, checkpoint: usize) -> Option<Object> {
    // `Lexer::parse_object` expects to consume the first lexeme itself; the
    // content-stream loop already did, so operands are parsed inline here
    // for the shapes that can appear as operands (numbers, strings, names,
    // arrays). Dictionaries never appear as content-stream operands.
    match lex {
        Lexeme::Integer(n) => Some(Object::Integer(n)),
        Lexeme::Real(r) => Some(Object::Real(r)),
        Lexeme::Name(n) => Some(Object::Name(n)),
        Lexeme::LiteralString(s) | Lexeme::HexString(s) => Some(Object::String(s)),
        Lexeme::ArrayStart => {
            let mut items = Vec::new();
            loop {
                let cp = lexer.pos();
                let next = lexer.next_lexeme();
                if matches!(next, Lexeme::ArrayEnd | Lexeme::Eof) {
                    break;
                }
                if let Some(obj) = reparse_operand(lexer, next, cp) {
                    items.push(obj);
                }
            }
            Some(Object::Array(items))
        }
        _ => {
            let _ = checkpoint;
            None
        }
    }
}

fn push_text_token(tokens: &mut Vec<Token>, bytes: &[u8], state: &TextState, font_size: f32, page_index: usize) {
    let text = decode_pdf_doc_string(bytes);
    if text.trim().is_empty() {
        return;
    }
    let width = text.chars().count() as f32 * font_size * 0.5;
    tokens.push(Token {
        text,
        x: state.matrix[4],
        y: state.matrix[5],
        width,
        height: font_size,
        page_index,
    });
}

/// PDFDocEncoding is ASCII-compatible for the glyph ranges invoice layouts
/// use; Latin-1 bytes above 0x7F are mapped directly, which covers Swedish
/// å/ä/ö when fonts use WinAnsiEncoding (the common case for generated PDFs).
fn decode_pdf_doc_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_show_text() {
        let content = b"BT /F1 12 Tf 100 700 Td (Hello) Tj ET";
        let tokens = tokenize_content(content, 0);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "Hello");
        assert_eq!(tokens[0].x, 100.0);
        assert_eq!(tokens[0].y, 700.0);
    }

    #[test]
    fn tj_array_advances_and_splits_runs() {
        let content = b"BT /F1 10 Tf 0 0 Td [(Foo)-250(Bar)] TJ ET";
        let tokens = tokenize_content(content, 0);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "Foo");
        assert_eq!(tokens[1].text, "Bar");
        assert!(tokens[1].x > tokens[0].x);
    }

    #[test]
    fn ignores_path_and_color_operators() {
        let content = b"1 0 0 RG 0 0 100 100 re f BT /F1 10 Tf 5 5 Td (X) Tj ET";
        let tokens = tokenize_content(content, 0);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "X");
    }
}
