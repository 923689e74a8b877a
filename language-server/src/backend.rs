use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use walkdir::WalkDir;

use crate::language::{ItemKind, TableError, Tables};
use crate::qbn::{self, Resource};
use crate::quest::{self, CancellationToken, Quest, QuestStore};
use crate::signature;
use crate::text::{column_to_byte, Document, DocumentStore};

pub struct Backend {
    pub(crate) client: Client,
    pub(crate) tables: Arc<parking_lot::RwLock<Tables>>,
    pub(crate) documents: Arc<DocumentStore>,
    pub(crate) quests: Arc<QuestStore>,
    pub(crate) workspace_roots: Arc<parking_lot::RwLock<Vec<PathBuf>>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tables: Arc::new(parking_lot::RwLock::new(Tables::default())),
            documents: Arc::new(DocumentStore::default()),
            quests: Arc::new(QuestStore::default()),
            workspace_roots: Arc::new(parking_lot::RwLock::new(Vec::new())),
        }
    }

    fn update_workspace_roots(&self, params: &InitializeParams) {
        let mut roots = self.workspace_roots.write();
        roots.clear();

        if let Some(root_uri) = params.root_uri.as_ref() {
            if let Ok(path) = root_uri.to_file_path() {
                if !roots.iter().any(|existing| existing == &path) {
                    roots.push(path);
                }
            }
        }

        if let Some(folders) = params.workspace_folders.as_ref() {
            for folder in folders {
                if let Ok(path) = folder.uri.to_file_path() {
                    if !roots.iter().any(|existing| existing == &path) {
                        roots.push(path);
                    }
                }
            }
        }
    }

    /// Decodes the table payloads the host attached to the initialize
    /// request. A table that fails to decode stays absent; the failure is
    /// reported and everything else proceeds.
    fn load_tables(&self, mut options: Value) -> Vec<TableError> {
        let mut errors = Vec::new();
        let mut tables = self.tables.write();

        if let Some(value) = take_field(&mut options, "language") {
            if let Err(error) = tables.language.load_language(value) {
                log::warn!("{error}");
                errors.push(error);
            }
        }
        if let Some(value) = take_field(&mut options, "attributes") {
            if let Err(error) = tables.language.load_attributes(value) {
                log::warn!("{error}");
                errors.push(error);
            }
        }
        if let Some(value) = take_field(&mut options, "definitions") {
            if let Err(error) = tables.language.load_definitions(value) {
                log::warn!("{error}");
                errors.push(error);
            }
        }
        if let Some(value) = take_field(&mut options, "messageAliases") {
            if let Err(error) = tables.load_message_aliases(value) {
                log::warn!("{error}");
                errors.push(error);
            }
        }

        if let Some(Value::Array(modules)) = take_field(&mut options, "modules") {
            for module in modules {
                if let Err(error) = tables.modules.load(module) {
                    log::warn!("{error}");
                    errors.push(error);
                }
            }
        }

        errors
    }

    pub(crate) fn analyze_document(&self, uri: &Url, text: &str) {
        let document = Document::new(text.to_string());
        let quest = {
            let tables = self.tables.read();
            Quest::parse(&document, &tables)
        };

        let uri_str = uri.to_string();
        self.documents.insert(uri_str.clone(), document);
        self.quests.insert(uri_str, quest);
    }

    async fn scan_directory(&self, uri: &Url) {
        let file_path = match uri.to_file_path() {
            Ok(path) => path,
            Err(_) => return,
        };

        let directories: Vec<PathBuf> = {
            let roots = self.workspace_roots.read();
            if roots.is_empty() {
                file_path
                    .parent()
                    .map(|dir| vec![dir.to_path_buf()])
                    .unwrap_or_default()
            } else {
                let mut dirs: Vec<PathBuf> = roots
                    .iter()
                    .filter(|root| file_path.starts_with(root))
                    .cloned()
                    .collect();
                if dirs.is_empty() {
                    dirs.extend(roots.iter().cloned());
                }
                dirs
            }
        };

        let mut visited = HashSet::new();
        for dir in directories {
            if !visited.insert(dir.clone()) || !dir.exists() {
                continue;
            }

            for entry in WalkDir::new(&dir)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.into_path();
                if path.extension().and_then(|s| s.to_str()) != Some("txt") {
                    continue;
                }
                if let Ok(uri) = Url::from_file_path(&path) {
                    if self.documents.contains_key(uri.as_str()) {
                        continue;
                    }
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        self.analyze_document(&uri, &content);
                    }
                }
            }
        }
    }

    async fn check_diagnostics(&self, uri: &Url) {
        let uri_str = uri.to_string();
        let Some(quest) = self.quests.get(&uri_str) else {
            return;
        };
        let Some(document) = self.documents.get(&uri_str) else {
            return;
        };

        let diagnostics = {
            let tables = self.tables.read();
            let mut diagnostics = quest.diagnostics(&tables);

            // Keyword signature checks, skipping message text lines.
            let message_lines: HashSet<u32> = quest
                .qrc
                .iterate_message_lines()
                .map(|line| line.number)
                .collect();
            for line in document.lines() {
                let trimmed = line.text.trim();
                if trimmed.is_empty()
                    || trimmed.starts_with('-')
                    || message_lines.contains(&line.number)
                {
                    continue;
                }
                diagnostics.extend(tables.language.do_diagnostics(&line));
            }

            diagnostics
        };

        drop(quest);
        drop(document);

        self.client
            .publish_diagnostics(uri.clone(), diagnostics, None)
            .await;
    }

    fn hover_markdown(&self, uri: &Url, position: Position) -> Option<String> {
        let uri_str = uri.to_string();
        let document = self.documents.get(&uri_str)?;
        let quest = self.quests.get(&uri_str)?;
        let tables = self.tables.read();

        let word = document.word_at(position)?;
        let line_text = document.line(position.line)?.text;

        // Symbols and tasks defined by this quest.
        if word.starts_with('_') || word.starts_with('=') {
            if let Some(resource) = quest.qbn.get_resource(&word) {
                let (category, summary) = match resource {
                    Resource::Symbol(symbol) => (
                        "symbol",
                        tables
                            .language
                            .find_symbol(&symbol.symbol_type)
                            .unwrap_or("")
                            .to_string(),
                    ),
                    Resource::Task(_) => ("task", String::new()),
                };
                return Some(make_hover(
                    category,
                    resource.line().text.trim(),
                    &summary,
                    &[],
                ));
            }
        }

        // Messages referenced by id.
        if word.parse::<i32>().is_ok() {
            if let Some(message) = quest.qrc.get_message(&word, &tables) {
                let header = document
                    .line(message.range.start.line)
                    .map(|line| line.text.trim().to_string())
                    .unwrap_or_default();
                let summary = message
                    .alias
                    .as_deref()
                    .and_then(|alias| tables.language.find_message(alias))
                    .map(|item| item.summary.clone())
                    .unwrap_or_default();
                return Some(make_hover("message", &header, &summary, &[]));
            }
        }

        // Definition groups, matched against the whole line.
        if let Some(definition) = tables.language.find_definition(&word, &line_text) {
            let mut signature = definition.signature().to_string();
            let overloads = tables.language.number_of_overloads(&word).saturating_sub(1);
            if overloads > 0 {
                signature.push_str(&format!(" (+{overloads} overloads)"));
            }
            let parameters: Vec<(String, String)> = definition
                .parameters
                .iter()
                .map(|p| (p.name.clone(), p.description.clone()))
                .collect();
            return Some(make_hover(
                "definition",
                &signature,
                &definition.summary,
                &parameters,
            ));
        }

        // Keywords, message types and global variables.
        if let Some(item) = tables.language.seek_by_name(&word) {
            let parameters: Vec<(String, String)> = item
                .parameters
                .iter()
                .map(|p| (p.name.clone(), p.description.clone()))
                .collect();
            return Some(make_hover(
                item.kind.label(),
                &signature::pretty_print(&item.signature),
                &item.summary,
                &parameters,
            ));
        }

        // References to other quests in the workspace.
        if quest::is_quest_reference(&line_text) {
            if let Some(target) = self
                .quests
                .iter()
                .find(|entry| entry.value().name.as_deref() == Some(word.as_str()))
            {
                let display_name = target.value().display_name.clone().unwrap_or_default();
                return Some(make_hover(
                    "quest",
                    &format!("Quest: {word}"),
                    &display_name,
                    &[],
                ));
            }
        }

        // Module conditions and actions.
        if let Some(result) = tables.modules.find_action(&word, &line_text) {
            let mut signature_text = if result.module_name.is_empty() {
                result.action.overloads[result.overload].clone()
            } else {
                format!(
                    "{} -> {}",
                    result.module_name, result.action.overloads[result.overload]
                )
            };
            if result.action.overloads.len() > 1 {
                signature_text.push_str("\n\nother overload(s):");
                for (index, overload) in result.action.overloads.iter().enumerate() {
                    if index != result.overload {
                        signature_text.push('\n');
                        signature_text.push_str(overload);
                    }
                }
            }
            return Some(make_hover(
                result.kind.label(),
                &signature::pretty_print(&signature_text),
                &result.action.summary,
                &[],
            ));
        }

        None
    }

    /// Definition range plus reference ranges of a symbol or task, narrowed
    /// to the name part of each occurrence.
    fn collect_resource_edits(
        &self,
        uri: &Url,
        resource: Resource<'_>,
        document: &Document,
        new_name: &str,
    ) -> HashMap<Url, Vec<TextEdit>> {
        let new_base = qbn::base_name(new_name).to_string();
        let mut edits: HashMap<Url, Vec<TextEdit>> = HashMap::new();

        let mut ranges = vec![resource.range()];
        ranges.extend_from_slice(resource.references());

        for range in ranges {
            if let Some(name_range) = base_name_range(document, range) {
                edits.entry(uri.clone()).or_default().push(TextEdit {
                    range: name_range,
                    new_text: new_base.clone(),
                });
            }
        }

        edits
    }
}

fn take_field(options: &mut Value, key: &str) -> Option<Value> {
    options.as_object_mut()?.remove(key)
}

/// Narrows an occurrence range to the undecorated name inside it, so a
/// rename keeps the `_`/`=` decorations intact.
fn base_name_range(document: &Document, range: Range) -> Option<Range> {
    let line = document.line(range.start.line)?;
    let start = column_to_byte(&line.text, range.start.character)?;
    let end = column_to_byte(&line.text, range.end.character)?;
    let token = &line.text[start..end];
    let base = qbn::base_name(token);
    if base.is_empty() {
        return None;
    }
    let offset = token.find(base)?;
    Some(line.sub_range(start + offset, start + offset + base.len()))
}

fn make_hover(category: &str, signature: &str, summary: &str, parameters: &[(String, String)]) -> String {
    let mut sections = Vec::new();

    if !signature.is_empty() {
        sections.push(format!("```template\n({category}) {signature}\n```"));
    }
    if !summary.is_empty() {
        sections.push(summary.to_string());
    }
    for (name, description) in parameters {
        sections.push(format!("*@param* `{name}` - {description}"));
    }

    sections.join("\n\n")
}

fn completion_kind(kind: ItemKind) -> CompletionItemKind {
    match kind {
        ItemKind::Symbol => CompletionItemKind::CLASS,
        ItemKind::Keyword => CompletionItemKind::KEYWORD,
        ItemKind::Message => CompletionItemKind::TEXT,
        ItemKind::Task => CompletionItemKind::VARIABLE,
        ItemKind::Definition => CompletionItemKind::SNIPPET,
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        self.update_workspace_roots(&params);

        let errors = match params.initialization_options {
            Some(options) => self.load_tables(options),
            None => Vec::new(),
        };
        for error in errors {
            self.client
                .show_message(MessageType::ERROR, error.to_string())
                .await;
        }
        let modules_missing = self.tables.read().modules.is_empty();
        if modules_missing {
            self.client
                .log_message(MessageType::WARNING, "No modules loaded")
                .await;
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "template-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                completion_provider: Some(CompletionOptions::default()),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                rename_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "Template LSP server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;

        self.analyze_document(&uri, &text);
        self.scan_directory(&uri).await;
        self.check_diagnostics(&uri).await;

        self.client
            .log_message(MessageType::INFO, format!("Opened document: {}", uri))
            .await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;

        if let Some(change) = params.content_changes.into_iter().next() {
            self.analyze_document(&uri, &change.text);
            self.check_diagnostics(&uri).await;
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;

        self.scan_directory(&uri).await;
        self.check_diagnostics(&uri).await;
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        Ok(self.hover_markdown(&uri, position).map(|value| Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value,
            }),
            range: None,
        }))
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let uri_str = uri.to_string();

        let Some(document) = self.documents.get(&uri_str) else {
            return Ok(None);
        };
        let prefix = document.word_at(position).unwrap_or_default();
        if prefix.is_empty() {
            return Ok(None);
        }

        let tables = self.tables.read();
        let mut items = Vec::new();

        for result in tables.language.seek_by_prefix(&prefix) {
            items.push(CompletionItem {
                label: signature::pretty_print(&result.signature),
                kind: Some(completion_kind(result.kind)),
                detail: Some(result.kind.label().to_string()),
                documentation: Some(Documentation::String(result.summary)),
                ..Default::default()
            });
        }

        for result in tables.modules.find_actions(&prefix) {
            items.push(CompletionItem {
                label: signature::pretty_print(&result.action.overloads[0]),
                kind: Some(CompletionItemKind::FUNCTION),
                detail: Some(format!("{} ({})", result.module_name, result.kind.label())),
                documentation: Some(Documentation::String(result.action.summary.clone())),
                ..Default::default()
            });
        }

        if let Some(quest) = self.quests.get(&uri_str) {
            for symbol in &quest.qbn.symbols {
                if symbol.name.starts_with(&prefix) {
                    items.push(CompletionItem {
                        label: symbol.name.clone(),
                        kind: Some(CompletionItemKind::CLASS),
                        detail: Some(symbol.symbol_type.clone()),
                        ..Default::default()
                    });
                }
            }
            for task in &quest.qbn.tasks {
                if task.name.starts_with(&prefix) {
                    items.push(CompletionItem {
                        label: task.name.clone(),
                        kind: Some(CompletionItemKind::VARIABLE),
                        detail: Some("task".to_string()),
                        ..Default::default()
                    });
                }
            }

            // A new message definition gets the next free id.
            if "message".starts_with(&prefix.to_ascii_lowercase()) {
                let id = quest.qrc.get_available_id(1011);
                items.push(CompletionItem {
                    label: format!("Message: {id}"),
                    kind: Some(CompletionItemKind::SNIPPET),
                    detail: Some("additional message".to_string()),
                    ..Default::default()
                });
            }
        }

        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(CompletionResponse::Array(items)))
        }
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let new_name = params.new_name;

        if new_name.is_empty() {
            return Ok(None);
        }

        let uri_str = uri.to_string();
        let Some(document) = self.documents.get(&uri_str) else {
            return Ok(None);
        };
        let Some(word) = document.word_at(position) else {
            return Ok(None);
        };
        let line_text = document
            .line(position.line)
            .map(|line| line.text)
            .unwrap_or_default();

        // Quest names are renamed across the whole workspace.
        if quest::is_quest_reference(&line_text) {
            let token = CancellationToken::default();
            let mut edits: HashMap<Url, Vec<TextEdit>> = HashMap::new();
            for (uri_str, range) in quest::find_quest_references(&self.documents, &word, &token) {
                if let Ok(target) = Url::parse(&uri_str) {
                    edits.entry(target).or_default().push(TextEdit {
                        range,
                        new_text: new_name.clone(),
                    });
                }
            }
            if edits.is_empty() {
                return Ok(None);
            }
            return Ok(Some(WorkspaceEdit {
                changes: Some(edits),
                ..WorkspaceEdit::default()
            }));
        }

        let Some(quest) = self.quests.get(&uri_str) else {
            return Ok(None);
        };
        let Some(resource) = quest.qbn.get_resource(&word) else {
            return Ok(None);
        };

        let edits = self.collect_resource_edits(&uri, resource, &document, &new_name);
        if edits.is_empty() {
            return Ok(Some(WorkspaceEdit::default()));
        }
        Ok(Some(WorkspaceEdit {
            changes: Some(edits),
            ..WorkspaceEdit::default()
        }))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let uri_str = uri.to_string();

        let Some(document) = self.documents.get(&uri_str) else {
            return Ok(None);
        };
        let Some(quest) = self.quests.get(&uri_str) else {
            return Ok(None);
        };
        let Some(word) = document.word_at(position) else {
            return Ok(None);
        };

        if let Some(resource) = quest.qbn.get_resource(&word) {
            return Ok(Some(GotoDefinitionResponse::Scalar(Location {
                uri: uri.clone(),
                range: resource.range(),
            })));
        }

        let tables = self.tables.read();
        if let Some(message) = quest.qrc.get_message(&word, &tables) {
            return Ok(Some(GotoDefinitionResponse::Scalar(Location {
                uri: uri.clone(),
                range: message.range,
            })));
        }

        Ok(None)
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let uri_str = uri.to_string();

        let Some(document) = self.documents.get(&uri_str) else {
            return Ok(None);
        };
        let Some(word) = document.word_at(position) else {
            return Ok(None);
        };
        let line_text = document
            .line(position.line)
            .map(|line| line.text)
            .unwrap_or_default();

        if quest::is_quest_reference(&line_text) {
            let token = CancellationToken::default();
            let locations = quest::find_quest_references(&self.documents, &word, &token)
                .into_iter()
                .filter_map(|(uri_str, range)| {
                    Url::parse(&uri_str).ok().map(|uri| Location { uri, range })
                })
                .collect();
            return Ok(Some(locations));
        }

        let Some(quest) = self.quests.get(&uri_str) else {
            return Ok(None);
        };
        let Some(resource) = quest.qbn.get_resource(&word) else {
            return Ok(None);
        };

        let mut locations = Vec::new();
        if params.context.include_declaration {
            locations.push(Location {
                uri: uri.clone(),
                range: resource.range(),
            });
        }
        for range in resource.references() {
            locations.push(Location {
                uri: uri.clone(),
                range: *range,
            });
        }

        Ok(Some(locations))
    }
}
