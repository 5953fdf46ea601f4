//! Markup/script region scanner.
//!
//! Splits a source document into alternating markup and script segments.
//! Scanning starts in markup unless the first marker in the document is a
//! close marker, in which case everything before it is script.

use super::{CompileError, CompileWarning};

/// Region delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub open: String,
    pub close: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            open: "<?".to_string(),
            close: "?>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Markup,
    Script,
}

/// A contiguous region of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
    /// 1-based line on which the segment text begins.
    pub line: usize,
}

#[derive(Debug, Default)]
pub struct Scan {
    pub segments: Vec<Segment>,
    pub warnings: Vec<CompileWarning>,
}

const STRAY_END_TAG: &str = "</html>";

/// Find `marker` in `text` starting at `from`, skipping occurrences escaped
/// with a backslash. Returns the marker position and the text before it
/// with escapes removed.
fn find_unescaped(text: &str, from: usize, marker: &str) -> (Option<usize>, String) {
    let mut literal = String::new();
    let mut cursor = from;
    loop {
        match text[cursor..].find(marker) {
            Some(offset) => {
                let at = cursor + offset;
                if at > from && text[..at].ends_with('\\') {
                    literal.push_str(&text[cursor..at - 1]);
                    literal.push_str(marker);
                    cursor = at + marker.len();
                } else {
                    literal.push_str(&text[cursor..at]);
                    return (Some(at), literal);
                }
            }
            None => {
                literal.push_str(&text[cursor..]);
                return (None, literal);
            }
        }
    }
}

fn count_lines(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count()
}

fn starts_in_script(source: &str, markers: &Markers) -> bool {
    let (close, _) = find_unescaped(source, 0, &markers.close);
    let (open, _) = find_unescaped(source, 0, &markers.open);
    match (open, close) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(open), Some(close)) => close < open,
    }
}

/// Split `source` into segments.
pub fn scan(source: &str, markers: &Markers, source_name: &str) -> Result<Scan, CompileError> {
    let mut scan = Scan::default();
    let mut pos = 0;
    let mut line = 1;
    let mut kind = if starts_in_script(source, markers) {
        SegmentKind::Script
    } else {
        SegmentKind::Markup
    };

    while pos < source.len() {
        match kind {
            SegmentKind::Markup => {
                let (found, literal) = find_unescaped(source, pos, &markers.open);
                if !literal.is_empty() {
                    scan.segments.push(Segment {
                        kind: SegmentKind::Markup,
                        text: literal,
                        line,
                    });
                }
                match found {
                    Some(at) => {
                        line += count_lines(&source[pos..at]);
                        pos = at + markers.open.len();
                        kind = SegmentKind::Script;
                    }
                    None => break,
                }
            }
            SegmentKind::Script => {
                let (found, text) = find_unescaped(source, pos, &markers.close);
                let Some(at) = found else {
                    return Err(CompileError::new(
                        format!("unterminated script block: missing '{}'", markers.close),
                        Some(line),
                        source_name,
                    ));
                };
                if let Some(offset) = text.to_ascii_lowercase().find(STRAY_END_TAG) {
                    scan.warnings.push(CompileWarning {
                        message: format!("'{}' inside a script block", STRAY_END_TAG),
                        line: line + count_lines(&text[..offset]),
                    });
                }
                scan.segments.push(Segment {
                    kind: SegmentKind::Script,
                    text,
                    line,
                });
                line += count_lines(&source[pos..at]);
                pos = at + markers.close.len();
                kind = SegmentKind::Markup;
            }
        }
    }

    Ok(scan)
}
