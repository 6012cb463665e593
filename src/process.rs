//! External process broker.
//!
//! Actions that need a helper tool (`codesign`, `tiffutil`, `lsregister`)
//! never spawn it directly. They hand a [`ProcessRequest`] to whatever
//! [`ProcessRunner`] the execution harness supplied, which lets tests swap in
//! [`RecordingProcessRunner`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::io;
use std::sync::Mutex;

use camino::Utf8PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<Utf8PathBuf>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn cwd(mut self, cwd: Option<Utf8PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// The invocation as a single shell-like line, for transcripts.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(status: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

pub trait ProcessRunner: Send + Sync + Debug {
    /// Runs the process to completion. `Err` means it could not be started.
    fn run(&self, request: &ProcessRequest) -> io::Result<ProcessOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, request: &ProcessRequest) -> io::Result<ProcessOutput> {
        let mut command = std::process::Command::new(&request.program);
        command.args(&request.args).envs(&request.env);

        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }

        tracing::debug!("spawning {}", request.display());
        let output = command.output()?;

        Ok(ProcessOutput {
            // Killed by a signal has no code; report it like a shell would.
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Test runner that records every request and replays queued responses.
///
/// Requests without a queued response succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingProcessRunner {
    requests: Mutex<Vec<ProcessRequest>>,
    responses: Mutex<VecDeque<io::Result<ProcessOutput>>>,
}

impl RecordingProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: io::Result<ProcessOutput>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ProcessRunner for RecordingProcessRunner {
    fn run(&self, request: &ProcessRequest) -> io::Result<ProcessOutput> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(ProcessOutput::success()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_runner_replays_in_order() {
        let runner = RecordingProcessRunner::new();
        runner.respond(Ok(ProcessOutput::failure(1, "boom")));

        let request = ProcessRequest::new("codesign").args(["--force", "a.app"]);
        assert_eq!(runner.run(&request).unwrap().status, 1);
        assert!(runner.run(&request).unwrap().is_success());

        let seen = runner.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].display(), "codesign --force a.app");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let request = ProcessRequest::new("sh").args(["-c", "printf hi; exit 3"]);
        let output = SystemProcessRunner.run(&request).unwrap();
        assert_eq!(output.stdout, b"hi");
        assert_eq!(output.status, 3);
    }
}
