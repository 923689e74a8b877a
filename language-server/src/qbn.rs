//! The QBN block: symbol and task definitions.

use lazy_static::lazy_static;
use regex::Regex;
use tower_lsp::lsp_types::Range;

use crate::language::Tables;
use crate::modules::ActionResult;
use crate::text::TextLine;

lazy_static! {
    static ref SYMBOL_DEF: Regex =
        Regex::new(r"^\s*([A-Z][a-zA-Z]*)\s+(_[a-zA-Z0-9._]+_)(?:\s+(.+))?$")
            .expect("symbol definition pattern is valid");
    static ref TASK_DEF: Regex = Regex::new(r"^\s*(_[a-zA-Z0-9._]+_)\s+task\s*:\s*$")
        .expect("task definition pattern is valid");
    static ref UNTIL_TASK_DEF: Regex =
        Regex::new(r"^\s*until\s+(_[a-zA-Z0-9._]+_)\s+performed\s*:\s*$")
            .expect("until-performed pattern is valid");
    static ref VARIABLE_DEF: Regex = Regex::new(r"^\s*([a-zA-Z][a-zA-Z0-9]*)\s+(_[a-zA-Z0-9._]+_)\s*$")
        .expect("variable definition pattern is valid");
}

/// A resource definition: `Person _merchant_ ...`, `Item _reward_ gold`.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Name as written, with its underscore decorations: `_merchant_`.
    pub name: String,
    /// The declared symbol type: `Person`, `Item`, `Clock`, ...
    pub symbol_type: String,
    /// Range of the name token on the definition line.
    pub range: Range,
    /// The full definition line.
    pub line: TextLine,
    pub references: Vec<Range>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// `_name_ task:`
    Standard,
    /// `until _name_ performed:`
    PersistUntil,
    /// `<GlobalVar> _name_`, linking the task to a global variable.
    GlobalVarLink,
}

/// A task definition in one of its three header forms.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub range: Range,
    pub line: TextLine,
    pub references: Vec<Range>,
}

/// A named QBN resource: either a symbol or a task.
///
/// The two share a name and reference locations; everything else is behind
/// the variant.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Symbol(&'a Symbol),
    Task(&'a Task),
}

impl Resource<'_> {
    pub fn name(&self) -> &str {
        match self {
            Resource::Symbol(symbol) => &symbol.name,
            Resource::Task(task) => &task.name,
        }
    }

    pub fn range(&self) -> Range {
        match self {
            Resource::Symbol(symbol) => symbol.range,
            Resource::Task(task) => task.range,
        }
    }

    pub fn references(&self) -> &[Range] {
        match self {
            Resource::Symbol(symbol) => &symbol.references,
            Resource::Task(task) => &task.references,
        }
    }

    pub fn line(&self) -> &TextLine {
        match self {
            Resource::Symbol(symbol) => &symbol.line,
            Resource::Task(task) => &task.line,
        }
    }
}

/// A task body line resolved to a module condition or action.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub line: TextLine,
    pub result: ActionResult,
}

/// Symbols and tasks of one document, in declaration order.
#[derive(Debug, Default)]
pub struct Qbn {
    pub symbols: Vec<Symbol>,
    pub tasks: Vec<Task>,
    pub actions: Vec<ActionInvocation>,
    pub failed_parse: Vec<TextLine>,
}

impl Qbn {
    /// Parses one line of the QBN block.
    pub fn parse(&mut self, line: &TextLine, tables: &Tables) {
        if let Some(captures) = TASK_DEF.captures(&line.text) {
            self.register_task(&captures[1], TaskKind::Standard, line);
            return;
        }

        if let Some(captures) = UNTIL_TASK_DEF.captures(&line.text) {
            self.register_task(&captures[1], TaskKind::PersistUntil, line);
            return;
        }

        if let Some(captures) = SYMBOL_DEF.captures(&line.text) {
            let symbol_type = &captures[1];
            if tables.language.find_symbol(symbol_type).is_some() {
                let name = captures[2].to_string();
                let range = line
                    .word_range(&name)
                    .unwrap_or_else(|| line.range());
                self.symbols.push(Symbol {
                    name,
                    symbol_type: symbol_type.to_string(),
                    range,
                    line: line.clone(),
                    references: Vec::new(),
                });
                return;
            }
        }

        if let Some(captures) = VARIABLE_DEF.captures(&line.text) {
            if tables.language.is_global_variable(&captures[1]) {
                self.register_task(&captures[2], TaskKind::GlobalVarLink, line);
                return;
            }
        }

        // Task body lines invoke module conditions and actions.
        if let Some(result) = tables.modules.find_invoked_action(&line.text) {
            self.actions.push(ActionInvocation {
                line: line.clone(),
                result,
            });
            return;
        }

        self.failed_parse.push(line.clone());
    }

    /// Finds a symbol by any of its decorated forms (`_name_`, `__name_`,
    /// `=name_`, ...).
    pub fn get_symbol(&self, name: &str) -> Option<&Symbol> {
        let base = base_name(name);
        self.symbols
            .iter()
            .find(|symbol| base_name(&symbol.name) == base)
    }

    pub fn get_task(&self, name: &str) -> Option<&Task> {
        let base = base_name(name);
        self.tasks.iter().find(|task| base_name(&task.name) == base)
    }

    /// Finds the symbol or task answering to `name`; symbols win ties.
    pub fn get_resource(&self, name: &str) -> Option<Resource<'_>> {
        self.get_symbol(name)
            .map(Resource::Symbol)
            .or_else(|| self.get_task(name).map(Resource::Task))
    }

    fn register_task(&mut self, name: &str, kind: TaskKind, line: &TextLine) {
        let range = line.word_range(name).unwrap_or_else(|| line.range());
        self.tasks.push(Task {
            name: name.to_string(),
            kind,
            range,
            line: line.clone(),
            references: Vec::new(),
        });
    }
}

/// Strips symbol decorations down to the bare name: `__vendor_` and
/// `=vendor_` both yield `vendor`.
pub fn base_name(token: &str) -> &str {
    token
        .trim_start_matches(['_', '='])
        .trim_end_matches('_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::tests::test_tables;

    fn parse_lines(lines: &[&str]) -> Qbn {
        let tables = test_tables();
        let mut qbn = Qbn::default();
        for (number, text) in lines.iter().enumerate() {
            qbn.parse(
                &TextLine {
                    number: number as u32,
                    text: (*text).to_string(),
                },
                &tables,
            );
        }
        qbn
    }

    #[test]
    fn recognizes_symbol_definitions_of_known_types() {
        let qbn = parse_lines(&[
            "Person _vendor_ group Resident2",
            "Clock _delay_ 1.00:00 0 flag 1 range 0 2",
        ]);

        assert_eq!(qbn.symbols.len(), 2);
        assert_eq!(qbn.symbols[0].name, "_vendor_");
        assert_eq!(qbn.symbols[0].symbol_type, "Person");
        assert_eq!(qbn.symbols[1].symbol_type, "Clock");
        assert!(qbn.failed_parse.is_empty());
    }

    #[test]
    fn unknown_symbol_types_are_failed_parse_lines() {
        let qbn = parse_lines(&["Widget _thing_ group 2"]);
        assert!(qbn.symbols.is_empty());
        assert_eq!(qbn.failed_parse.len(), 1);
    }

    #[test]
    fn recognizes_all_three_task_forms() {
        let qbn = parse_lines(&[
            "_slain_ task:",
            "until _timeout_ performed:",
            "BrisiennaEnding _ending_",
        ]);

        assert_eq!(qbn.tasks.len(), 3);
        assert_eq!(qbn.tasks[0].kind, TaskKind::Standard);
        assert_eq!(qbn.tasks[1].kind, TaskKind::PersistUntil);
        assert_eq!(qbn.tasks[2].kind, TaskKind::GlobalVarLink);
    }

    #[test]
    fn unknown_variable_words_do_not_declare_tasks() {
        let qbn = parse_lines(&["NotAVariable _ending_"]);
        assert!(qbn.tasks.is_empty());
        assert_eq!(qbn.failed_parse.len(), 1);
    }

    #[test]
    fn lookup_accepts_decorated_forms() {
        let qbn = parse_lines(&["Person _vendor_ group Resident2", "_slain_ task:"]);

        assert!(qbn.get_symbol("_vendor_").is_some());
        assert!(qbn.get_symbol("__vendor_").is_some());
        assert!(qbn.get_symbol("=vendor_").is_some());
        assert!(qbn.get_symbol("_nobody_").is_none());

        let resource = qbn.get_resource("_slain_").expect("task found");
        assert!(matches!(resource, Resource::Task(_)));
        assert_eq!(resource.name(), "_slain_");
    }

    #[test]
    fn task_body_lines_resolve_to_module_actions() {
        let qbn = parse_lines(&["_slain_ task:", "say 1030"]);
        assert_eq!(qbn.actions.len(), 1);
        assert_eq!(qbn.actions[0].result.action.overloads[0], "say %n");
        assert!(qbn.failed_parse.is_empty());
    }

    #[test]
    fn base_name_strips_all_decorations() {
        assert_eq!(base_name("_vendor_"), "vendor");
        assert_eq!(base_name("____dungeon_"), "dungeon");
        assert_eq!(base_name("==npc_"), "npc");
        assert_eq!(base_name("plain"), "plain");
    }
}
