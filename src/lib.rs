use zed_extension_api::{self as zed, LanguageServerId, Result};

struct TemplateExtension;

impl zed::Extension for TemplateExtension {
    fn new() -> Self {
        Self
    }

    fn language_server_command(
        &mut self,
        language_server_id: &LanguageServerId,
        worktree: &zed::Worktree,
    ) -> Result<zed::Command> {
        if language_server_id.as_ref() != "template-lsp" {
            return Err(format!(
                "Unknown language server: {}",
                language_server_id.as_ref()
            ));
        }

        let command = worktree
            .which("template-lsp")
            .ok_or_else(|| "template-lsp binary not found in PATH".to_string())?;

        Ok(zed::Command {
            command,
            args: vec![],
            env: Default::default(),
        })
    }
}

zed::register_extension!(TemplateExtension);
