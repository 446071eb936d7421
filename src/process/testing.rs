//! Scripted command runner for pipeline tests

use std::sync::Mutex;

use super::{CapturedOutput, CommandRunner, CommandSpec, ProcessError};

/// What a scripted command does
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Exit(i32),
    Output(i32, String),
    NotFound,
}

type Script = Box<dyn Fn(&CommandSpec) -> Reply>;

/// Records every command and answers from a script
pub(crate) struct ScriptedRunner {
    script: Script,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub(crate) fn new(script: impl Fn(&CommandSpec) -> Reply + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Display strings of every recorded command
    pub(crate) fn lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }

    fn answer(&self, spec: &CommandSpec) -> Reply {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        (self.script)(spec)
    }

    fn not_found(spec: &CommandSpec) -> ProcessError {
        ProcessError::Spawn {
            command: spec.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<i32, ProcessError> {
        match self.answer(spec) {
            Reply::Exit(code) | Reply::Output(code, _) => Ok(code),
            Reply::NotFound => Err(Self::not_found(spec)),
        }
    }

    async fn capture(&self, spec: &CommandSpec) -> Result<CapturedOutput, ProcessError> {
        match self.answer(spec) {
            Reply::Exit(code) => Ok(CapturedOutput {
                code,
                stdout: String::new(),
            }),
            Reply::Output(code, stdout) => Ok(CapturedOutput { code, stdout }),
            Reply::NotFound => Err(Self::not_found(spec)),
        }
    }
}
