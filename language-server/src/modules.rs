//! Imported module descriptors: the conditions and actions a quest can invoke.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::boolean_expression;
use crate::language::TableError;
use crate::signature;

lazy_static! {
    static ref INVOCATION: Regex =
        Regex::new(r"^\s*([a-zA-Z]+)\s").expect("invocation pattern is valid");
}

/// One condition or action, with its overloads in declaration order.
#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub summary: String,
    pub overloads: Vec<String>,
}

/// An externally loaded module descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub conditions: Vec<Action>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Condition,
    Action,
}

impl ActionKind {
    pub fn label(self) -> &'static str {
        match self {
            ActionKind::Condition => "condition",
            ActionKind::Action => "action",
        }
    }
}

/// A resolved invocation: which module, which entry, which overload.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub module_name: String,
    pub kind: ActionKind,
    pub action: Action,
    pub overload: usize,
}

#[derive(Debug, Default)]
pub struct Modules {
    modules: Vec<Module>,
}

impl Modules {
    /// Decodes one already-fetched module descriptor and registers it.
    pub fn load(&mut self, value: Value) -> Result<(), TableError> {
        let module: Module = serde_json::from_value(value).map_err(|source| TableError::Decode {
            table: "module",
            source,
        })?;
        self.register(module);
        Ok(())
    }

    pub fn register(&mut self, module: Module) {
        self.modules.push(module);
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Finds the action or condition referenced by a line of a task.
    ///
    /// Entries are tried in module order, conditions before actions, and each
    /// entry's overloads in declared order; the first overload whose derived
    /// matcher accepts the full text wins. Lines no module recognizes fall
    /// back to the boolean-expression recognizer.
    pub fn find_action(&self, prefix: &str, text: &str) -> Option<ActionResult> {
        for result in self.find_actions(prefix) {
            for (index, overload) in result.action.overloads.iter().enumerate() {
                if signature::compile(overload).is_match(text) {
                    return Some(ActionResult {
                        overload: index,
                        ..result.clone()
                    });
                }
            }
        }

        if boolean_expression::matches(prefix, text) {
            return Some(boolean_expression::make_result(text));
        }

        None
    }

    /// All conditions and actions whose first overload starts with `prefix`.
    pub fn find_actions<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = ActionResult> + 'a {
        self.modules.iter().flat_map(move |module| {
            let conditions = filter_actions(&module.conditions, prefix).map(move |action| {
                ActionResult {
                    module_name: module.display_name.clone(),
                    kind: ActionKind::Condition,
                    action: action.clone(),
                    overload: 0,
                }
            });
            let actions = filter_actions(&module.actions, prefix).map(move |action| ActionResult {
                module_name: module.display_name.clone(),
                kind: ActionKind::Action,
                action: action.clone(),
                overload: 0,
            });
            conditions.chain(actions)
        })
    }

    /// Resolves the action or condition invoked by a full line of a task.
    pub fn find_invoked_action(&self, text: &str) -> Option<ActionResult> {
        let captures = INVOCATION.captures(text)?;
        self.find_action(captures.get(1)?.as_str(), text)
    }
}

fn filter_actions<'a>(actions: &'a [Action], prefix: &'a str) -> impl Iterator<Item = &'a Action> {
    actions.iter().filter(move |action| {
        action
            .overloads
            .first()
            .is_some_and(|overload| overload.starts_with(prefix))
    })
}

/// Expands the host-resolved placeholder tokens a module path may contain.
pub fn resolve_data_path(
    path: &str,
    extension_path: &Path,
    workspace_folder: Option<&Path>,
) -> PathBuf {
    let mut resolved = path.replace("${extensionPath}", &extension_path.to_string_lossy());
    if let Some(workspace) = workspace_folder {
        resolved = resolved.replace("${workspaceFolder}", &workspace.to_string_lossy());
    }
    PathBuf::from(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_modules() -> Modules {
        let mut modules = Modules::default();
        modules
            .load(json!({
                "displayName": "Core",
                "conditions": [
                    {
                        "summary": "Triggers when the player enters a place.",
                        "overloads": ["pc at %s_place_", "pc at %s_place_ set %s_task_"]
                    }
                ],
                "actions": [
                    {
                        "summary": "Starts a timer.",
                        "overloads": ["start timer %s_timer"]
                    },
                    {
                        "summary": "Starts or clears a task.",
                        "overloads": ["start task %s_task", "clear %s_task"]
                    }
                ]
            }))
            .expect("valid module descriptor");
        modules
    }

    #[test]
    fn resolves_first_matching_overload() {
        let modules = test_modules();
        let result = modules
            .find_action("start", "start timer _timer_")
            .expect("action resolves");
        assert_eq!(result.module_name, "Core");
        assert_eq!(result.kind, ActionKind::Action);
        assert_eq!(result.overload, 0);
    }

    #[test]
    fn overloads_resolve_in_declared_order() {
        let modules = test_modules();
        let at = modules
            .find_action("pc", "pc at _palace_ set _visited_")
            .expect("condition resolves");
        assert_eq!(at.kind, ActionKind::Condition);
        assert_eq!(at.overload, 1);
    }

    #[test]
    fn unmatched_invocations_fall_back_to_boolean_expressions() {
        let modules = test_modules();
        let result = modules
            .find_action("when", "when _slain_ and not _timeout_")
            .expect("boolean expression recognized");
        assert_eq!(result.kind, ActionKind::Condition);

        assert!(modules.find_action("teleport", "teleport pc to _room_").is_none());
    }

    #[test]
    fn invoked_action_is_resolved_from_the_leading_word() {
        let modules = test_modules();
        let result = modules
            .find_invoked_action("    start task _deliver_")
            .expect("invocation resolves");
        assert_eq!(result.overload, 0);
        assert_eq!(result.action.overloads[0], "start task %s_task");
    }

    #[test]
    fn module_paths_expand_host_placeholders() {
        let path = resolve_data_path(
            "${extensionPath}/modules/core.json",
            Path::new("/ext"),
            None,
        );
        assert_eq!(path, PathBuf::from("/ext/modules/core.json"));

        let path = resolve_data_path(
            "${workspaceFolder}/quests/modules.json",
            Path::new("/ext"),
            Some(Path::new("/work")),
        );
        assert_eq!(path, PathBuf::from("/work/quests/modules.json"));
    }
}
