//! Static language knowledge: symbol types, keywords, messages, global
//! variables, attribute lists and definition groups.
//!
//! Tables are loaded once from already-parsed values, are read-only
//! afterwards, and travel inside an explicitly passed [`Tables`] context. A
//! table that fails to decode stays absent; lookups against an absent table
//! return `None`.

use std::collections::HashMap;
use std::sync::OnceLock;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity};

use crate::modules::Modules;
use crate::signature;
use crate::text::TextLine;

lazy_static! {
    static ref LEADING_WORD: Regex =
        Regex::new(r"^\s*([a-zA-Z]+)").expect("leading word pattern is valid");
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to decode {table} table: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub description: String,
}

/// Describes one keyword, message type or global-variable entry.
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageItem {
    pub summary: String,
    pub signature: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Deserialize)]
struct LanguageTable {
    #[serde(default)]
    symbols: HashMap<String, String>,
    #[serde(default)]
    keywords: HashMap<String, LanguageItem>,
    #[serde(default)]
    messages: HashMap<String, LanguageItem>,
    #[serde(rename = "globalVariables", default)]
    global_variables: HashMap<String, i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeItem {
    pub attribute: String,
    pub values: Vec<String>,
}

/// One overload of a symbol-type definition.
#[derive(Debug, Deserialize)]
pub struct Definition {
    pub snippet: String,
    /// Explicit pattern override; when absent the matcher is derived from
    /// the snippet.
    #[serde(rename = "match", default)]
    pub match_pattern: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(skip)]
    signature: OnceLock<String>,
}

impl Definition {
    /// Display form of the snippet, derived on first use.
    pub fn signature(&self) -> &str {
        self.signature
            .get_or_init(|| signature::pretty_print(&self.snippet))
    }

    fn matches(&self, text: &str) -> bool {
        match self.match_pattern.as_deref() {
            Some(pattern) => match signature::compile_override(pattern) {
                Ok(matcher) => matcher.is_match(text),
                Err(error) => {
                    log::warn!("ignoring invalid match override {pattern:?}: {error}");
                    false
                }
            },
            None => signature::compile(&self.snippet).is_match(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Symbol,
    Keyword,
    Message,
    Task,
    Definition,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Symbol => "symbol",
            ItemKind::Keyword => "keyword",
            ItemKind::Message => "message",
            ItemKind::Task => "task",
            ItemKind::Definition => "definition",
        }
    }
}

/// A lookup result carrying the matched item and the family it came from.
#[derive(Debug, Clone)]
pub struct LanguageItemResult {
    pub kind: ItemKind,
    pub summary: String,
    pub signature: String,
    pub parameters: Vec<Parameter>,
}

impl LanguageItemResult {
    fn from_item(item: &LanguageItem, kind: ItemKind) -> Self {
        Self {
            kind,
            summary: item.summary.clone(),
            signature: item.signature.clone(),
            parameters: item.parameters.clone(),
        }
    }
}

/// Base language data for intellisense features.
#[derive(Debug, Default)]
pub struct Language {
    table: Option<LanguageTable>,
    attributes: Vec<AttributeItem>,
    definitions: Option<HashMap<String, Vec<Definition>>>,
}

impl Language {
    /// Decodes the already-fetched language table.
    pub fn load_language(&mut self, value: Value) -> Result<(), TableError> {
        self.table = Some(serde_json::from_value(value).map_err(|source| TableError::Decode {
            table: "language",
            source,
        })?);
        Ok(())
    }

    /// Decodes the already-fetched attributes table.
    pub fn load_attributes(&mut self, value: Value) -> Result<(), TableError> {
        self.attributes = serde_json::from_value(value).map_err(|source| TableError::Decode {
            table: "attributes",
            source,
        })?;
        Ok(())
    }

    /// Decodes the already-fetched definitions table.
    pub fn load_definitions(&mut self, value: Value) -> Result<(), TableError> {
        self.definitions =
            Some(serde_json::from_value(value).map_err(|source| TableError::Decode {
                table: "definitions",
                source,
            })?);
        Ok(())
    }

    pub fn find_symbol(&self, name: &str) -> Option<&str> {
        self.table
            .as_ref()?
            .symbols
            .get(name)
            .map(String::as_str)
    }

    pub fn find_keyword(&self, name: &str) -> Option<&LanguageItem> {
        self.table.as_ref()?.keywords.get(name)
    }

    pub fn find_message(&self, name: &str) -> Option<&LanguageItem> {
        self.table.as_ref()?.messages.get(name)
    }

    pub fn find_global_variable(&self, name: &str) -> Option<i32> {
        self.table.as_ref()?.global_variables.get(name).copied()
    }

    pub fn is_global_variable(&self, name: &str) -> bool {
        self.find_global_variable(name).is_some()
    }

    /// Finds the definition overload matched by the invoking text.
    ///
    /// Entries of the named group are tried in declared order; the first
    /// whose pattern accepts the text wins.
    pub fn find_definition(&self, name: &str, text: &str) -> Option<&Definition> {
        self.definitions
            .as_ref()?
            .get(name)?
            .iter()
            .find(|definition| definition.matches(text))
    }

    pub fn number_of_overloads(&self, symbol_type: &str) -> usize {
        self.definitions
            .as_ref()
            .and_then(|definitions| definitions.get(symbol_type))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Finds an item with the given exact name in any family.
    pub fn seek_by_name(&self, name: &str) -> Option<LanguageItemResult> {
        if let Some(summary) = self.find_symbol(name) {
            return Some(LanguageItemResult {
                kind: ItemKind::Symbol,
                summary: summary.to_string(),
                signature: String::new(),
                parameters: Vec::new(),
            });
        }

        if let Some(keyword) = self.find_keyword(name) {
            return Some(LanguageItemResult::from_item(keyword, ItemKind::Keyword));
        }

        if let Some(message) = self.find_message(name) {
            return Some(LanguageItemResult::from_item(message, ItemKind::Message));
        }

        if let Some(number) = self.find_global_variable(name) {
            return Some(LanguageItemResult {
                kind: ItemKind::Task,
                summary: format!("Global variable number {number}."),
                signature: name.to_string(),
                parameters: Vec::new(),
            });
        }

        None
    }

    /// All items whose name starts with the given string, family by family.
    pub fn seek_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = LanguageItemResult> + 'a {
        let table = self.table.as_ref();

        let keywords = table
            .map(|t| &t.keywords)
            .into_iter()
            .flatten()
            .filter(move |(name, _)| name.starts_with(prefix))
            .map(|(_, item)| LanguageItemResult::from_item(item, ItemKind::Keyword));

        let messages = table
            .map(|t| &t.messages)
            .into_iter()
            .flatten()
            .filter(move |(name, _)| name.starts_with(prefix))
            .map(|(_, item)| LanguageItemResult::from_item(item, ItemKind::Message));

        let global_variables = table
            .map(|t| &t.global_variables)
            .into_iter()
            .flatten()
            .filter(move |(name, _)| name.starts_with(prefix))
            .map(|(name, number)| LanguageItemResult {
                kind: ItemKind::Task,
                summary: format!("Global variable number {number}."),
                signature: format!("{name} ${{1:_varSymbol_}}"),
                parameters: Vec::new(),
            });

        let definitions = self
            .definitions
            .as_ref()
            .into_iter()
            .flatten()
            .filter(move |(name, _)| name.starts_with(prefix))
            .flat_map(|(_, group)| group.iter())
            .map(|definition| LanguageItemResult {
                kind: ItemKind::Definition,
                summary: definition.summary.clone(),
                signature: definition.snippet.clone(),
                parameters: definition.parameters.clone(),
            });

        keywords
            .chain(messages)
            .chain(global_variables)
            .chain(definitions)
    }

    fn is_attribute_value(&self, attribute: &str, word: &str) -> bool {
        self.attributes
            .iter()
            .any(|item| item.attribute == attribute && item.values.iter().any(|v| v == word))
    }

    /// True when `word` names an individual NPC or a faction.
    pub fn is_npc_name(&self, word: &str) -> bool {
        self.is_attribute_value("named", word) || self.is_attribute_value("faction", word)
    }

    /// Checks one line against the signature of its leading keyword.
    pub fn do_diagnostics(&self, line: &TextLine) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if let Some(captures) = LEADING_WORD.captures(&line.text) {
            let word = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            if let Some(keyword) = self.find_keyword(word) {
                if !signature::compile(&keyword.signature).is_match(&line.text) {
                    diagnostics.push(Diagnostic {
                        range: line.range(),
                        severity: Some(DiagnosticSeverity::WARNING),
                        code: None,
                        code_description: None,
                        source: Some("template-lsp".to_string()),
                        message: format!(
                            "Expected: {}",
                            signature::pretty_print(&keyword.signature)
                        ),
                        related_information: None,
                        tags: None,
                        data: None,
                    });
                }
            }
        }
        diagnostics
    }
}

/// All static knowledge, loaded once at startup and injected everywhere a
/// lookup is needed.
#[derive(Debug, Default)]
pub struct Tables {
    pub language: Language,
    pub modules: Modules,
    /// Alias → message id, from the static message alias table.
    pub message_aliases: HashMap<String, i32>,
}

impl Tables {
    /// Decodes the already-fetched alias table.
    pub fn load_message_aliases(&mut self, value: Value) -> Result<(), TableError> {
        self.message_aliases =
            serde_json::from_value(value).map_err(|source| TableError::Decode {
                table: "message aliases",
                source,
            })?;
        Ok(())
    }
}
