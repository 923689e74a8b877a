//! The QRC block: numbered text messages and the macros they contain.
//!
//! Parsing is line-by-line and stateful. The cursor state lives in an
//! explicit [`BlockContext`] passed into and out of every step, so an
//! incremental re-parse can start mid-document by resetting the context
//! instead of replaying the whole file.

use lazy_static::lazy_static;
use regex::Regex;
use tower_lsp::lsp_types::Range;

use crate::language::Tables;
use crate::text::{Document, TextLine};

lazy_static! {
    static ref STATIC_MESSAGE: Regex =
        Regex::new(r"^\s*(?i:message)\s*:\s*(-?\d+)\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*$")
            .expect("static message pattern is valid");
    static ref ID_MESSAGE: Regex = Regex::new(r"^\s*(?i:message)\s*:\s*(-?\d+)\s*$")
        .expect("message id pattern is valid");
    static ref MACRO: Regex = Regex::new(r"%[a-z0-9]+\b").expect("macro pattern is valid");
}

/// A numbered, optionally aliased block of display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i32,
    /// Range of the id token on the header line.
    pub range: Range,
    pub alias: Option<String>,
    pub text_block: Vec<TextLine>,
    pub references: Vec<Range>,
}

/// An occurrence of a `%token` substitution marker inside message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMacro {
    pub symbol: String,
    pub range: Range,
}

/// Cursor state threaded through [`Qrc::parse`] calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockContext {
    #[default]
    None,
    InsideMessageBlock {
        /// Index of the active message in [`Qrc::messages`].
        message: usize,
        /// Last line number belonging to the block, inclusive.
        block_end: u32,
    },
}

/// What one parse step did with its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    MessageStarted,
    LineAppended { macros: usize },
    Unrecognized,
}

/// Messages and macros of one document, in declaration order.
#[derive(Debug, Default)]
pub struct Qrc {
    pub messages: Vec<Message>,
    pub macros: Vec<ContextMacro>,
    pub failed_parse: Vec<TextLine>,
}

impl Qrc {
    /// Parses one line of the QRC block.
    pub fn parse(
        &mut self,
        document: &Document,
        line: &TextLine,
        tables: &Tables,
        context: &mut BlockContext,
    ) -> LineOutcome {
        // Continuation of the active message block.
        if let BlockContext::InsideMessageBlock { message, block_end } = *context {
            if line.number <= block_end {
                let macros = self.parse_message_line(message, line);
                return LineOutcome::LineAppended { macros };
            }
        }

        // Static message definition: declares an id and binds a known alias.
        if let Some(captures) = STATIC_MESSAGE.captures(&line.text) {
            let alias = &captures[2];
            if tables.message_aliases.contains_key(alias) {
                if let Ok(id) = captures[1].parse::<i32>() {
                    let message = self.register_message(id, line, Some(alias.to_string()));
                    *context = BlockContext::InsideMessageBlock {
                        message,
                        block_end: block_extent(document, line.number),
                    };
                    return LineOutcome::MessageStarted;
                }
            }
        }

        // Additional message definition: a bare id.
        if let Some(captures) = ID_MESSAGE.captures(&line.text) {
            if let Ok(id) = captures[1].parse::<i32>() {
                let message = self.register_message(id, line, None);
                *context = BlockContext::InsideMessageBlock {
                    message,
                    block_end: block_extent(document, line.number),
                };
                return LineOutcome::MessageStarted;
            }
        }

        // Undefined expression; this also closes any open block.
        *context = BlockContext::None;
        self.failed_parse.push(line.clone());
        LineOutcome::Unrecognized
    }

    /// Finds a message by numeric id or by alias.
    ///
    /// Duplicate ids are tolerated; the first message in declaration order
    /// wins. An alias the static table does not know resolves to nothing.
    pub fn get_message(&self, id_or_alias: &str, tables: &Tables) -> Option<&Message> {
        let id = match id_or_alias.parse::<i32>() {
            Ok(id) => id,
            Err(_) => *tables.message_aliases.get(id_or_alias)?,
        };
        self.messages.iter().find(|message| message.id == id)
    }

    /// Gets the next message id not used by any registered message, starting
    /// the probe at `current`.
    pub fn get_available_id(&self, current: i32) -> i32 {
        let mut id = current;
        while self.messages.iter().any(|message| message.id == id) {
            id += 1;
        }
        id
    }

    /// Iterates all text lines inside all message blocks, in declaration
    /// order.
    pub fn iterate_message_lines(&self) -> impl Iterator<Item = &TextLine> {
        self.messages
            .iter()
            .flat_map(|message| message.text_block.iter())
    }

    /// Messages whose id was already taken by an earlier declaration.
    pub fn duplicate_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .enumerate()
            .filter_map(move |(index, message)| {
                self.messages[..index]
                    .iter()
                    .any(|earlier| earlier.id == message.id)
                    .then_some(message)
            })
    }

    fn register_message(&mut self, id: i32, line: &TextLine, alias: Option<String>) -> usize {
        let range = line
            .word_range(&id.to_string())
            .unwrap_or_else(|| line.range());
        self.messages.push(Message {
            id,
            range,
            alias,
            text_block: Vec::new(),
            references: Vec::new(),
        });
        self.messages.len() - 1
    }

    fn parse_message_line(&mut self, message: usize, line: &TextLine) -> usize {
        self.messages[message].text_block.push(line.clone());

        let mut macros = 0;
        for found in MACRO.find_iter(&line.text) {
            self.macros.push(ContextMacro {
                symbol: found.as_str().to_string(),
                range: line.sub_range(found.start(), found.end()),
            });
            macros += 1;
        }
        macros
    }
}

/// True when a line would start a new message block.
pub fn is_message_header(text: &str) -> bool {
    STATIC_MESSAGE.is_match(text) || ID_MESSAGE.is_match(text)
}

/// Computes the extent of the block opened at `header`, scanning forward for
/// contiguous lines that are neither blank nor a new header. Returns the last
/// line number belonging to the block; an immediately closed block returns
/// the header line itself.
fn block_extent(document: &Document, header: u32) -> u32 {
    let mut end = header;
    let mut next = header + 1;
    while let Some(line) = document.line(next) {
        if line.text.trim().is_empty() || is_message_header(&line.text) {
            break;
        }
        end = next;
        next += 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::tests::test_tables;
    use tower_lsp::lsp_types::Position;

    fn parse_document(text: &str) -> (Qrc, Document) {
        let tables = test_tables();
        let document = Document::new(text.to_string());
        let mut qrc = Qrc::default();
        let mut context = BlockContext::None;
        for line in document.lines() {
            if line.text.trim().is_empty() {
                continue;
            }
            qrc.parse(&document, &line, &tables, &mut context);
        }
        (qrc, document)
    }

    #[test]
    fn static_message_header_registers_id_and_alias() {
        let tables = test_tables();
        let document = Document::new("Message: 1010 myMessageAlias\ntext\n".to_string());
        let mut qrc = Qrc::default();
        let mut context = BlockContext::None;

        let outcome = qrc.parse(
            &document,
            &document.line(0).unwrap(),
            &tables,
            &mut context,
        );

        assert_eq!(outcome, LineOutcome::MessageStarted);
        assert_eq!(qrc.messages.len(), 1);
        assert_eq!(qrc.messages[0].id, 1010);
        assert_eq!(qrc.messages[0].alias.as_deref(), Some("myMessageAlias"));
        assert!(matches!(
            context,
            BlockContext::InsideMessageBlock { message: 0, .. }
        ));
    }

    #[test]
    fn continuation_line_is_appended_and_macros_extracted() {
        let tables = test_tables();
        let text = "Message: 1010 myMessageAlias\nYou enter the dungeon. The slab reads %god.\n";
        let document = Document::new(text.to_string());
        let mut qrc = Qrc::default();
        let mut context = BlockContext::None;

        qrc.parse(&document, &document.line(0).unwrap(), &tables, &mut context);
        let outcome = qrc.parse(&document, &document.line(1).unwrap(), &tables, &mut context);

        assert_eq!(outcome, LineOutcome::LineAppended { macros: 1 });
        assert_eq!(qrc.messages[0].text_block.len(), 1);
        assert_eq!(qrc.macros.len(), 1);
        assert_eq!(qrc.macros[0].symbol, "%god");

        let column = "You enter the dungeon. The slab reads ".len() as u32;
        assert_eq!(
            qrc.macros[0].range,
            Range {
                start: Position {
                    line: 1,
                    character: column,
                },
                end: Position {
                    line: 1,
                    character: column + "%god".len() as u32,
                },
            }
        );
    }

    #[test]
    fn headerless_line_outside_a_block_resets_the_cursor() {
        let tables = test_tables();
        let text = "Message: 1020\nsome text\n\nnot a header\n";
        let document = Document::new(text.to_string());
        let mut qrc = Qrc::default();
        let mut context = BlockContext::None;

        qrc.parse(&document, &document.line(0).unwrap(), &tables, &mut context);
        qrc.parse(&document, &document.line(1).unwrap(), &tables, &mut context);
        let lines_before: usize = qrc.messages[0].text_block.len();

        let outcome = qrc.parse(&document, &document.line(3).unwrap(), &tables, &mut context);

        assert_eq!(outcome, LineOutcome::Unrecognized);
        assert_eq!(context, BlockContext::None);
        assert_eq!(qrc.messages[0].text_block.len(), lines_before);
        assert_eq!(qrc.failed_parse.len(), 1);
        assert_eq!(qrc.failed_parse[0].text, "not a header");
    }

    #[test]
    fn duplicate_ids_are_registered_and_first_wins() {
        let tables = test_tables();
        let (qrc, _) = parse_document("Message: 1030\nfirst\n\nMessage: 1030\nsecond\n");

        assert_eq!(qrc.messages.len(), 2);
        let found = qrc.get_message("1030", &tables).expect("message found");
        assert_eq!(found.text_block[0].text, "first");
        assert_eq!(qrc.duplicate_messages().count(), 1);
    }

    #[test]
    fn alias_lookup_resolves_through_the_static_table() {
        let tables = test_tables();
        let (qrc, _) = parse_document("Message: 1010 myMessageAlias\nhello\n");

        assert!(qrc.get_message("myMessageAlias", &tables).is_some());
        assert!(qrc.get_message("1010", &tables).is_some());
        assert!(qrc.get_message("unknownAlias", &tables).is_none());
    }

    #[test]
    fn unknown_alias_on_a_header_is_unrecognized() {
        let (qrc, _) = parse_document("Message: 1050 unknownAlias\n");
        assert!(qrc.messages.is_empty());
        assert_eq!(qrc.failed_parse.len(), 1);
    }

    #[test]
    fn block_extent_stops_at_blank_lines_and_new_headers() {
        let text = "Message: 1011\nline one\nline two\n\nMessage: 1012\nother\n";
        let document = Document::new(text.to_string());
        assert_eq!(block_extent(&document, 0), 2);
        assert_eq!(block_extent(&document, 4), 5);
    }

    #[test]
    fn get_available_id_probes_past_used_ids() {
        let (qrc, _) = parse_document("Message: 1011\na\n\nMessage: 1012\nb\n\nMessage: 1014\nc\n");

        assert_eq!(qrc.get_available_id(1011), 1013);
        assert_eq!(qrc.get_available_id(1015), 1015);
    }

    #[test]
    fn iterate_message_lines_spans_all_messages_in_order() {
        let (qrc, _) = parse_document("Message: 1011\na\nb\n\nMessage: 1012\nc\n");

        let lines: Vec<_> = qrc
            .iterate_message_lines()
            .map(|line| line.text.as_str())
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);

        // Restartable: a second pass yields the same sequence.
        assert_eq!(qrc.iterate_message_lines().count(), 3);
    }

    #[test]
    fn reparsing_identical_text_is_idempotent() {
        let text = "Message: 1010 myMessageAlias\nhello %god\n\nMessage: 1020\nworld\n";
        let (first, _) = parse_document(text);
        let (second, _) = parse_document(text);

        let snapshot = |qrc: &Qrc| {
            qrc.messages
                .iter()
                .map(|m| (m.id, m.alias.clone(), m.range))
                .collect::<Vec<_>>()
        };
        assert_eq!(snapshot(&first), snapshot(&second));
        assert_eq!(first.macros, second.macros);
    }

    #[test]
    fn negative_and_zero_ids_are_accepted() {
        let (qrc, _) = parse_document("Message: 0\nzero\n\nMessage: -2\nneg\n");
        assert_eq!(qrc.messages.len(), 2);
        assert_eq!(qrc.messages[0].id, 0);
        assert_eq!(qrc.messages[1].id, -2);
    }
}
