use dashmap::DashMap;
use tower_lsp::lsp_types::{Position, Range};

pub type DocumentStore = DashMap<String, Document>;

type LineOffset = usize;

/// An immutable snapshot of one quest source file with a prebuilt line index.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    line_index: LineIndex,
}

/// One line of a document, addressed by its zero-based line number.
///
/// The text never includes the line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub number: u32,
    pub text: String,
}

impl TextLine {
    /// Range spanning the whole line.
    pub fn range(&self) -> Range {
        self.sub_range(0, self.text.len())
    }

    /// Half-open `[start, end)` range within this line, given byte offsets
    /// into the line text. Columns are reported in UTF-16 units.
    pub fn sub_range(&self, start: usize, end: usize) -> Range {
        Range {
            start: Position {
                line: self.number,
                character: utf16_len(&self.text[..start.min(self.text.len())]),
            },
            end: Position {
                line: self.number,
                character: utf16_len(&self.text[..end.min(self.text.len())]),
            },
        }
    }

    /// Range of the first occurrence of `word` in this line, if any.
    pub fn word_range(&self, word: &str) -> Option<Range> {
        let start = self.text.find(word)?;
        Some(self.sub_range(start, start + word.len()))
    }
}

impl Document {
    pub fn new(text: String) -> Self {
        let line_index = LineIndex::new(&text);
        Self { text, line_index }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> u32 {
        self.line_index.line_starts.len() as u32
    }

    /// Returns the line at `number`, without its terminator.
    pub fn line(&self, number: u32) -> Option<TextLine> {
        let line = number as usize;
        let start = *self.line_index.line_starts.get(line)?;
        let end = self
            .line_index
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len());
        let mut slice = &self.text[start..end];
        if slice.ends_with('\n') {
            slice = &slice[..slice.len() - 1];
        }
        if slice.ends_with('\r') {
            slice = &slice[..slice.len() - 1];
        }
        Some(TextLine {
            number,
            text: slice.to_string(),
        })
    }

    pub fn lines(&self) -> impl Iterator<Item = TextLine> + '_ {
        (0..self.line_count()).filter_map(move |number| self.line(number))
    }

    /// The quest-script token under `position`, if any.
    ///
    /// Tokens include symbol decorations (`_`, `=`), macro markers (`%`) and
    /// dotted names, so `__vendor_` or `%god` come back whole.
    pub fn word_at(&self, position: Position) -> Option<String> {
        let line = self.line(position.line)?;
        let offset = column_to_byte(&line.text, position.character)?;

        let is_word_char =
            |ch: char| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '%' | '=' | '-');
        let mut start = offset;
        while start > 0 {
            let prev = line.text[..start].chars().next_back()?;
            if !is_word_char(prev) {
                break;
            }
            start -= prev.len_utf8();
        }
        let mut end = offset;
        for ch in line.text[offset..].chars() {
            if !is_word_char(ch) {
                break;
            }
            end += ch.len_utf8();
        }

        if start == end {
            return None;
        }
        Some(line.text[start..end].to_string())
    }
}

fn utf16_len(text: &str) -> u32 {
    text.chars().map(|ch| ch.len_utf16() as u32).sum()
}

pub(crate) fn column_to_byte(text: &str, character: u32) -> Option<usize> {
    let mut units = 0u32;
    for (idx, ch) in text.char_indices() {
        if units >= character {
            return Some(idx);
        }
        units += ch.len_utf16() as u32;
    }
    if units >= character {
        Some(text.len())
    } else {
        None
    }
}

#[derive(Debug, Clone)]
struct LineIndex {
    line_starts: Vec<LineOffset>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (idx, ch) in text.char_indices() {
            if ch == '\n' {
                line_starts.push(idx + 1);
            }
        }
        Self { line_starts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_lines_without_terminators() {
        let doc = Document::new("QRC:\r\nMessage: 1010\ntext\n".to_string());
        assert_eq!(doc.line(0).unwrap().text, "QRC:");
        assert_eq!(doc.line(1).unwrap().text, "Message: 1010");
        assert_eq!(doc.line(2).unwrap().text, "text");
        assert!(doc.text().starts_with("QRC:"));
        assert_eq!(doc.lines().count(), 4);
    }

    #[test]
    fn sub_range_is_half_open() {
        let line = TextLine {
            number: 3,
            text: "The slab reads %god.".to_string(),
        };
        let range = line.sub_range(15, 19);
        assert_eq!(
            range.start,
            Position {
                line: 3,
                character: 15
            }
        );
        assert_eq!(
            range.end,
            Position {
                line: 3,
                character: 19
            }
        );
    }

    #[test]
    fn word_at_keeps_symbol_decorations() {
        let doc = Document::new("Place _mondung_ permanent dungeon2\n".to_string());
        let word = doc.word_at(Position {
            line: 0,
            character: 9,
        });
        assert_eq!(word.as_deref(), Some("_mondung_"));
    }

    #[test]
    fn word_at_outside_any_token_is_none() {
        let doc = Document::new("a  b\n".to_string());
        assert_eq!(
            doc.word_at(Position {
                line: 0,
                character: 2
            }),
            None
        );
    }
}
