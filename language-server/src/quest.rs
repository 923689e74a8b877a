//! One parsed quest document: preamble, QRC block, QBN block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Range};

use crate::language::Tables;
use crate::qbn::{self, Qbn};
use crate::qrc::{BlockContext, Qrc};
use crate::text::{Document, TextLine};

lazy_static! {
    static ref QRC_HEADER: Regex =
        Regex::new(r"^\s*QRC\s*:\s*$").expect("qrc header pattern is valid");
    static ref QBN_HEADER: Regex =
        Regex::new(r"^\s*QBN\s*:\s*$").expect("qbn header pattern is valid");
    static ref QUEST_NAME: Regex =
        Regex::new(r"^\s*Quest\s*:\s+([a-zA-Z0-9._-]+)\s*$").expect("quest name pattern is valid");
    static ref DISPLAY_NAME: Regex = Regex::new(r"^\s*DisplayName\s*:\s+(.+?)\s*$")
        .expect("display name pattern is valid");
    static ref SYMBOL_TOKEN: Regex =
        Regex::new(r"(?:={1,2}|_{1,4})[a-zA-Z0-9.]+_").expect("symbol token pattern is valid");
    static ref NUMBER_TOKEN: Regex = Regex::new(r"\b\d+\b").expect("number token pattern is valid");
    static ref QUEST_REFERENCE: Regex = Regex::new(r"^\s*(?:start|run)\s+quest\s+([a-zA-Z0-9._-]+)")
        .expect("quest reference pattern is valid");
    static ref NAMED_NPC: Regex =
        Regex::new(r"\bnamed\s+([a-zA-Z_][a-zA-Z0-9._]*)").expect("named npc pattern is valid");
}

/// Cooperative cancellation flag for workspace-wide scans.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub type QuestStore = DashMap<String, Quest>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Qrc,
    Qbn,
}

/// A fully parsed quest document.
#[derive(Debug, Default)]
pub struct Quest {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub qrc: Qrc,
    pub qbn: Qbn,
    /// Preamble lines that matched no directive.
    pub failed_parse: Vec<TextLine>,
    /// Symbol-shaped tokens that resolve to no symbol or task.
    pub unresolved_references: Vec<(String, Range)>,
}

impl Quest {
    /// Parses a whole document. Blank lines and `-` comments are skipped;
    /// `QRC:` and `QBN:` headers route the lines that follow. A malformed
    /// document still yields partial structure.
    pub fn parse(document: &Document, tables: &Tables) -> Quest {
        let mut quest = Quest::default();
        let mut section = Section::Preamble;
        let mut context = BlockContext::None;

        for line in document.lines() {
            let trimmed = line.text.trim();
            if trimmed.is_empty() || trimmed.starts_with('-') {
                continue;
            }

            if QRC_HEADER.is_match(&line.text) {
                section = Section::Qrc;
                context = BlockContext::None;
                continue;
            }
            if QBN_HEADER.is_match(&line.text) {
                section = Section::Qbn;
                context = BlockContext::None;
                continue;
            }

            match section {
                Section::Preamble => quest.parse_preamble_line(&line),
                Section::Qrc => {
                    quest.qrc.parse(document, &line, tables, &mut context);
                }
                Section::Qbn => quest.qbn.parse(&line, tables),
            }
        }

        quest.link_references(document);
        quest
    }

    fn parse_preamble_line(&mut self, line: &TextLine) {
        if let Some(captures) = QUEST_NAME.captures(&line.text) {
            self.name = Some(captures[1].to_string());
            return;
        }
        if let Some(captures) = DISPLAY_NAME.captures(&line.text) {
            self.display_name = Some(captures[1].to_string());
            return;
        }
        self.failed_parse.push(line.clone());
    }

    /// Records every occurrence of a symbol, task or message id outside its
    /// own definition, and remembers tokens that resolve to nothing.
    fn link_references(&mut self, document: &Document) {
        let definition_lines: Vec<u32> = self
            .qbn
            .symbols
            .iter()
            .map(|symbol| symbol.line.number)
            .chain(self.qbn.tasks.iter().map(|task| task.line.number))
            .collect();

        for line in document.lines() {
            let trimmed = line.text.trim();
            if trimmed.is_empty() || trimmed.starts_with('-') {
                continue;
            }

            for found in SYMBOL_TOKEN.find_iter(&line.text) {
                let token = found.as_str();
                let range = line.sub_range(found.start(), found.end());
                let base = qbn::base_name(token);

                if let Some(index) = self
                    .qbn
                    .symbols
                    .iter()
                    .position(|symbol| qbn::base_name(&symbol.name) == base)
                {
                    let symbol = &mut self.qbn.symbols[index];
                    if range != symbol.range {
                        symbol.references.push(range);
                    }
                    continue;
                }
                if let Some(index) = self
                    .qbn
                    .tasks
                    .iter()
                    .position(|task| qbn::base_name(&task.name) == base)
                {
                    let task = &mut self.qbn.tasks[index];
                    if range != task.range {
                        task.references.push(range);
                    }
                    continue;
                }
                if definition_lines.contains(&line.number) {
                    // Unresolvable tails of definition lines are legitimate
                    // (group names, schedules), skip them.
                    continue;
                }
                self.unresolved_references.push((token.to_string(), range));
            }

            // Message id references from QBN action lines, e.g. `say 1030`.
            if crate::qrc::is_message_header(&line.text) {
                continue;
            }
            for found in NUMBER_TOKEN.find_iter(&line.text) {
                let range = line.sub_range(found.start(), found.end());
                if let Ok(id) = found.as_str().parse::<i32>() {
                    if let Some(message) = self
                        .qrc
                        .messages
                        .iter_mut()
                        .find(|message| message.id == id)
                    {
                        if range != message.range
                            && !message
                                .text_block
                                .iter()
                                .any(|text| text.number == line.number)
                        {
                            message.references.push(range);
                        }
                    }
                }
            }
        }
    }

    /// Best-effort issues for the whole document. Nothing here is fatal.
    pub fn diagnostics(&self, tables: &Tables) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for line in self
            .failed_parse
            .iter()
            .chain(self.qrc.failed_parse.iter())
            .chain(self.qbn.failed_parse.iter())
        {
            diagnostics.push(warning(line.range(), "Undefined expression.".to_string()));
        }

        for message in self.qrc.duplicate_messages() {
            diagnostics.push(warning(
                message.range,
                format!("Message id {} is already in use.", message.id),
            ));
        }

        for (token, range) in &self.unresolved_references {
            diagnostics.push(warning(
                *range,
                format!("Undefined symbol or task {token}."),
            ));
        }

        // NPC names on Person definitions come from the attributes table.
        for symbol in &self.qbn.symbols {
            if symbol.symbol_type != "Person" {
                continue;
            }
            if let Some(captures) = NAMED_NPC.captures(&symbol.line.text) {
                let npc = &captures[1];
                if !tables.language.is_npc_name(npc) {
                    diagnostics.push(warning(
                        symbol.line.range(),
                        format!("Unknown NPC or faction name {npc}."),
                    ));
                }
            }
        }

        diagnostics
    }
}

fn warning(range: Range, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::WARNING),
        code: None,
        code_description: None,
        source: Some("template-lsp".to_string()),
        message,
        related_information: None,
        tags: None,
        data: None,
    }
}

/// True when the line starts another quest by name.
pub fn is_quest_reference(text: &str) -> bool {
    QUEST_REFERENCE.is_match(text)
}

/// Finds every reference to the named quest across all cached documents.
///
/// This walks the entire workspace cache, so it observes the cancellation
/// token between documents and stops promptly once it is raised.
pub fn find_quest_references(
    documents: &crate::text::DocumentStore,
    name: &str,
    token: &CancellationToken,
) -> Vec<(String, Range)> {
    let mut locations = Vec::new();

    for entry in documents.iter() {
        if token.is_cancelled() {
            break;
        }
        for line in entry.value().lines() {
            let Some(captures) = QUEST_REFERENCE.captures(&line.text) else {
                continue;
            };
            let Some(matched) = captures.get(1) else {
                continue;
            };
            if matched.as_str() == name {
                locations.push((
                    entry.key().clone(),
                    line.sub_range(matched.start(), matched.end()),
                ));
            }
        }
    }

    locations
}
