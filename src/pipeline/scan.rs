//! Minimal JavaScript lexer
//!
//! Splits source text into code, string, template, regex and comment
//! segments. It does not parse; it only knows enough to tell whether a byte
//! is part of executable code, which is what the linters, the annotator and
//! the built-in minifier need.

/// Kind of source region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Code,
    /// Single or double quoted string, quotes included
    String,
    /// Backtick template, backticks included
    Template,
    Regex,
    LineComment,
    BlockComment,
}

impl Region {
    pub fn is_comment(self) -> bool {
        matches!(self, Region::LineComment | Region::BlockComment)
    }

    /// Regions whose text must be kept byte for byte
    pub fn is_literal(self) -> bool {
        matches!(self, Region::String | Region::Template | Region::Regex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub region: Region,
    pub text: &'a str,
    /// Byte offset of `text` in the source
    pub start: usize,
}

/// Bytes after which a `/` starts a regex literal rather than a division
const REGEX_PRECEDERS: &[u8] = b"(,=:[!&|?{};+-*%<>~^";
const REGEX_KEYWORDS: &[&str] = &["return", "typeof", "case", "in", "of", "void", "delete", "instanceof", "new"];

pub fn segments(source: &str) -> Vec<Segment<'_>> {
    let bytes = source.as_bytes();
    let mut segs = Vec::new();
    let mut i = 0;
    let mut code_start = 0;
    let mut prev: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        let literal = match b {
            b'\'' | b'"' => Some((Region::String, scan_quoted(bytes, i, b))),
            b'`' => Some((Region::Template, scan_quoted(bytes, i, b))),
            b'/' if next == Some(b'/') => Some((Region::LineComment, scan_line_comment(bytes, i))),
            b'/' if next == Some(b'*') => Some((Region::BlockComment, scan_block_comment(source, i))),
            b'/' if regex_allowed(source, i, prev) => Some((Region::Regex, scan_regex(bytes, i))),
            _ => None,
        };

        match literal {
            Some((region, end)) => {
                if code_start < i {
                    segs.push(Segment {
                        region: Region::Code,
                        text: &source[code_start..i],
                        start: code_start,
                    });
                }
                segs.push(Segment {
                    region,
                    text: &source[i..end],
                    start: i,
                });
                if region.is_literal() {
                    // a literal is an operand; a following `/` divides
                    prev = Some(b'0');
                }
                i = end;
                code_start = end;
            }
            None => {
                if !b.is_ascii_whitespace() {
                    prev = Some(b);
                }
                i += 1;
            }
        }
    }

    if code_start < bytes.len() {
        segs.push(Segment {
            region: Region::Code,
            text: &source[code_start..],
            start: code_start,
        });
    }

    segs
}

fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' if quote != b'`' => return j,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

fn scan_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&c| c == b'\n')
        .map(|p| start + p)
        .unwrap_or(bytes.len())
}

fn scan_block_comment(source: &str, start: usize) -> usize {
    source[start + 2..]
        .find("*/")
        .map(|p| start + 2 + p + 2)
        .unwrap_or(source.len())
}

fn scan_regex(bytes: &[u8], start: usize) -> usize {
    let mut j = start + 1;
    let mut in_class = false;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return j,
            b'[' => {
                in_class = true;
                j += 1;
            }
            b']' => {
                in_class = false;
                j += 1;
            }
            b'/' if !in_class => {
                j += 1;
                while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                    j += 1;
                }
                return j;
            }
            _ => j += 1,
        }
    }
    bytes.len()
}

fn regex_allowed(source: &str, at: usize, prev: Option<u8>) -> bool {
    match prev {
        None => true,
        Some(c) if REGEX_PRECEDERS.contains(&c) => true,
        Some(c) if c.is_ascii_alphabetic() => {
            let before = source[..at].trim_end();
            let word_start = before
                .rfind(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
                .map(|p| p + 1)
                .unwrap_or(0);
            REGEX_KEYWORDS.contains(&&before[word_start..])
        }
        _ => false,
    }
}

/// Copy of `source` with every non-code byte replaced by a space.
///
/// Newlines and quote characters survive, so byte offsets, line numbers and
/// the shape of string literals are preserved.
pub fn code_mask(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for seg in segments(source) {
        match seg.region {
            Region::Code => out.push_str(seg.text),
            Region::String | Region::Template => {
                let len = seg.text.len();
                for (idx, ch) in seg.text.char_indices() {
                    let keep = ch == '\n' || ((idx == 0 || idx + ch.len_utf8() == len) && matches!(ch, '\'' | '"' | '`'));
                    blank_char(&mut out, ch, keep);
                }
            }
            _ => {
                for ch in seg.text.chars() {
                    blank_char(&mut out, ch, ch == '\n');
                }
            }
        }
    }
    out
}

fn blank_char(out: &mut String, ch: char, keep: bool) {
    if keep {
        out.push(ch);
    } else {
        out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
    }
}

/// 1-based line and column of a byte offset
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map(|p| offset - p).unwrap_or(offset + 1);
    (line, column)
}
