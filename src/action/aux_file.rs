use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use super::{ActionContext, CommandResult, write_output};
use crate::diagnostics::{Diagnostic, DiagnosticsCollector, OutputDelegate};

/// Writes bytes known at planning time, such as link file lists or generated
/// headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuxiliaryFileAction {
    pub output: Utf8PathBuf,
    pub contents: Vec<u8>,
    /// Unix mode bits applied after writing, if any.
    pub permissions: Option<u32>,
    /// Rewrite even when the file already holds these exact bytes.
    pub force_write: bool,
    /// Echo the contents into the build transcript.
    pub log_contents: bool,
    /// Reported every time the action runs, e.g. problems found while the
    /// contents were generated.
    pub diagnostics: Vec<Diagnostic>,
}

impl AuxiliaryFileAction {
    pub fn new(output: impl Into<Utf8PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            contents: contents.into(),
            permissions: None,
            force_write: false,
            log_contents: false,
            diagnostics: Vec::new(),
        }
    }

    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    pub fn force_write(mut self, value: bool) -> Self {
        self.force_write = value;
        self
    }

    pub fn log_contents(mut self, value: bool) -> Self {
        self.log_contents = value;
        self
    }

    pub fn diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }

    pub(super) fn perform(&self, ctx: &ActionContext, sink: &mut DiagnosticsCollector) -> CommandResult {
        for diagnostic in &self.diagnostics {
            sink.emit(diagnostic.clone());
        }

        if self.log_contents {
            sink.emit_output(&self.contents);
            if !self.contents.ends_with(b"\n") {
                sink.emit_output(b"\n");
            }
        }

        let unchanged = !self.force_write
            && ctx
                .fs
                .read(&self.output)
                .is_ok_and(|existing| existing == self.contents);

        if unchanged {
            tracing::debug!("{} is up to date", self.output);
        } else if !write_output(ctx.fs, &self.output, &self.contents, sink) {
            return CommandResult::Failed;
        }

        if let Some(mode) = self.permissions {
            let current = ctx.fs.stat(&self.output).map(|info| info.permissions);
            if current.as_ref().ok() != Some(&mode)
                && let Err(e) = ctx.fs.set_permissions(&self.output, mode)
            {
                sink.error(format!("unable to set permissions of '{}': {e}", self.output));
                return CommandResult::Failed;
            }
        }

        CommandResult::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::action::TaskAction;
    use crate::action::testing::Harness;
    use crate::diagnostics::Behavior;
    use crate::fs::FileSystem;

    #[test]
    fn test_signature_dimensions() {
        let base = TaskAction::AuxiliaryFile(AuxiliaryFileAction::new("/tmp/a", "x").permissions(0o644));

        let same = TaskAction::AuxiliaryFile(AuxiliaryFileAction::new("/tmp/a", "x").permissions(0o644));
        let other_path = TaskAction::AuxiliaryFile(AuxiliaryFileAction::new("/tmp/b", "x").permissions(0o644));
        let other_content = TaskAction::AuxiliaryFile(AuxiliaryFileAction::new("/tmp/a", "y").permissions(0o644));
        let other_mode = TaskAction::AuxiliaryFile(AuxiliaryFileAction::new("/tmp/a", "x").permissions(0o755));

        assert_eq!(base.signature(), same.signature());
        assert_ne!(base.signature(), other_path.signature());
        assert_ne!(base.signature(), other_content.signature());
        assert_ne!(base.signature(), other_mode.signature());
    }

    #[test]
    fn test_writes_with_permissions_and_logs() {
        let harness = Harness::new();
        let action = AuxiliaryFileAction::new("/out/dir/script.sh", "echo hi")
            .permissions(0o755)
            .log_contents(true)
            .diagnostic(Diagnostic::warning("generated with defaults"));

        let (result, out) = harness.run(TaskAction::AuxiliaryFile(action), &[]);

        assert_eq!(result, CommandResult::Succeeded);
        assert_eq!(harness.fs.read(Utf8Path::new("/out/dir/script.sh")).unwrap(), b"echo hi");
        assert_eq!(harness.fs.stat(Utf8Path::new("/out/dir/script.sh")).unwrap().permissions, 0o755);
        assert_eq!(out.transcript_lossy(), "echo hi\n");
        assert_eq!(out.messages(Behavior::Warning), vec!["generated with defaults"]);
    }

    #[test]
    fn test_unchanged_file_is_left_alone_unless_forced() {
        let harness = Harness::new();
        harness.fs.add_file("/out/a.txt", "same");
        let before = harness.fs.stat(Utf8Path::new("/out/a.txt")).unwrap().modified_nanos;

        harness.run(TaskAction::AuxiliaryFile(AuxiliaryFileAction::new("/out/a.txt", "same")), &[]);
        let after = harness.fs.stat(Utf8Path::new("/out/a.txt")).unwrap().modified_nanos;
        assert_eq!(before, after);

        let forced = AuxiliaryFileAction::new("/out/a.txt", "same").force_write(true);
        harness.run(TaskAction::AuxiliaryFile(forced), &[]);
        let forced_after = harness.fs.stat(Utf8Path::new("/out/a.txt")).unwrap().modified_nanos;
        assert_ne!(after, forced_after);
    }

    #[test]
    fn test_error_diagnostic_fails_the_task() {
        let harness = Harness::new();
        let action = AuxiliaryFileAction::new("/out/a.txt", "x").diagnostic(Diagnostic::error("bad input"));
        let (result, _) = harness.run(TaskAction::AuxiliaryFile(action), &[]);

        // The file is still written, but the task must not report success.
        assert_eq!(result, CommandResult::Failed);
        assert!(harness.fs.exists(Utf8Path::new("/out/a.txt")));
    }
}
