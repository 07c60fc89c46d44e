//! Best-effort static attribute extraction.
//!
//! Each attribute comes from its own tool invocation. A failed invocation
//! degrades only that attribute to `None` and is logged; it never fails
//! the surrounding unit.

use super::tools::{ToolCommand, ToolError, ToolRunner};
use crate::models::StaticAttributes;
use std::{path::Path, sync::Arc};
use tracing::{debug, warn};

const ARCH_MARKER: &str = "\narchitecture: ";
const ARCH_END_MARKER: &str = ", flags";
const IMPORT_TOKEN: &str = "offset";
const EXPORT_TOKEN: &str = "Name:";
/// Printed by the dump tool when it cannot make sense of the file.
const DUMP_ABORT_MARKER: &str = "Can't get a suitable file signature";

/// Commands used per attribute. Symbol tables are optional.
#[derive(Clone, Debug)]
pub struct AnalyzerTools {
    pub architecture: ToolCommand,
    pub imports: Option<ToolCommand>,
    pub exports: Option<ToolCommand>,
}

impl Default for AnalyzerTools {
    fn default() -> Self {
        Self {
            architecture: ToolCommand {
                program: "objdump".into(),
                args: vec!["-f".into()],
            },
            imports: ToolCommand::parse("winedump dump -j import"),
            exports: ToolCommand::parse("winedump dump -j export"),
        }
    }
}

#[derive(Clone)]
pub struct Analyzer {
    runner: Arc<dyn ToolRunner>,
    tools: AnalyzerTools,
}

impl Analyzer {
    pub fn new(runner: Arc<dyn ToolRunner>, tools: AnalyzerTools) -> Self {
        Self { runner, tools }
    }

    /// Run all configured tools on `path` concurrently.
    pub async fn analyze(&self, path: &Path) -> StaticAttributes {
        let (architecture, imports, exports) = tokio::join!(
            self.architecture(path),
            self.symbols(self.tools.imports.as_ref(), path, parse_imports),
            self.symbols(self.tools.exports.as_ref(), path, parse_exports),
        );
        let attributes = StaticAttributes {
            architecture,
            imports,
            exports,
        };
        debug!("attributes of {}: {:?}", path.display(), attributes);
        attributes
    }

    /// `None` only when the tool itself failed. A successful run without
    /// the markers yields an empty architecture.
    async fn architecture(&self, path: &Path) -> Option<String> {
        let output = self.invoke(&self.tools.architecture, path).await?;
        let arch = parse_architecture(&output);
        if arch.is_empty() {
            debug!(
                "no architecture marker in `{}` output for {}",
                self.tools.architecture,
                path.display()
            );
        }
        Some(arch)
    }

    async fn symbols(
        &self,
        command: Option<&ToolCommand>,
        path: &Path,
        parse: fn(&str) -> Vec<String>,
    ) -> Option<Vec<String>> {
        let command = command?;
        let output = self.invoke(command, path).await?;
        match reject_aborted_dump(command, output) {
            Ok(output) => Some(parse(&output)),
            Err(err) => {
                warn!("`{}` failed on {}: {}", command, path.display(), err);
                None
            }
        }
    }

    async fn invoke(&self, command: &ToolCommand, path: &Path) -> Option<String> {
        match self.runner.run(command, path).await {
            Ok(output) => Some(output),
            Err(err) => {
                warn!("`{}` failed on {}: {}", command, path.display(), err);
                None
            }
        }
    }
}

/// A dump tool that gives up still exits 0; its banner turns the run into
/// a failure.
fn reject_aborted_dump(command: &ToolCommand, output: String) -> Result<String, ToolError> {
    if output.contains(DUMP_ABORT_MARKER) {
        return Err(ToolError::Aborted {
            program: command.program.clone(),
            reason: DUMP_ABORT_MARKER.into(),
        });
    }
    Ok(output)
}

/// Text strictly between the first `"\narchitecture: "` and the first
/// `", flags"` that follows it; empty when either marker is missing.
pub fn parse_architecture(output: &str) -> String {
    let Some(found) = output.find(ARCH_MARKER) else {
        return String::new();
    };
    let start = found + ARCH_MARKER.len();
    match output[start..].find(ARCH_END_MARKER) {
        Some(len) => output[start..start + len].to_string(),
        None => String::new(),
    }
}

/// Library names: last token of every trimmed line starting with `offset`.
pub fn parse_imports(output: &str) -> Vec<String> {
    last_tokens_of_lines_starting_with(output, IMPORT_TOKEN)
}

/// Export names: last token of every trimmed line starting with `Name:`.
pub fn parse_exports(output: &str) -> Vec<String> {
    last_tokens_of_lines_starting_with(output, EXPORT_TOKEN)
}

fn last_tokens_of_lines_starting_with(output: &str, token: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(token))
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect()
}
