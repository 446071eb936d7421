//! Python interpreter discovery
//!
//! Probes a list of known command names in order and picks the first one
//! that runs and reports a version inside the supported range.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::{CommandRunner, CommandSpec};

/// Where users are sent when no usable interpreter exists
pub const PYTHON_DOWNLOAD_URL: &str = "https://www.python.org/downloads/";

const VERSION_PROBE: &str = "import sys; print('%d.%d.%d' % sys.version_info[:3])";

/// Interpreter discovery errors
#[derive(Error, Debug)]
pub enum InterpreterError {
    #[error(
        "No Python interpreter was found (tried: {searched}). \
         Install Python {range} from https://www.python.org/downloads/."
    )]
    NotFound { searched: String, range: VersionRange },

    #[error(
        "Python {range} is required to bootstrap LofiSymphony, but only found {found}. \
         Please install a compatible version from https://www.python.org/downloads/."
    )]
    Incompatible { found: String, range: VersionRange },

    #[error("Invalid Python version: {0}")]
    InvalidVersion(String),
}

/// A `major.minor.patch` Python version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PythonVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn minor_pair(&self) -> (u32, u32) {
        (self.major, self.minor)
    }
}

impl FromStr for PythonVersion {
    type Err = InterpreterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InterpreterError::InvalidVersion(s.to_string());
        let mut parts = s.trim().split('.');

        let mut next = |required: bool| -> Result<u32, InterpreterError> {
            match parts.next() {
                Some(p) => {
                    // Tolerate suffixes such as "0rc1"
                    let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
                    digits.parse().map_err(|_| invalid())
                }
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };

        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Supported interpreter versions: `min <= v < max_exclusive`, compared on major.minor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: (u32, u32),
    pub max_exclusive: Option<(u32, u32)>,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self {
            min: (3, 9),
            max_exclusive: Some((3, 13)),
        }
    }
}

impl VersionRange {
    pub fn contains(&self, version: PythonVersion) -> bool {
        let v = version.minor_pair();
        v >= self.min && self.max_exclusive.map_or(true, |max| v < max)
    }

    /// Parse a `"3.9"` style bound
    pub fn parse_bound(s: &str) -> Result<(u32, u32), InterpreterError> {
        let version: PythonVersion = s.parse()?;
        Ok(version.minor_pair())
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">={}.{}", self.min.0, self.min.1)?;
        if let Some((major, minor)) = self.max_exclusive {
            write!(f, ", <{}.{}", major, minor)?;
        }
        Ok(())
    }
}

/// A command that may start a Python interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterCandidate {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl InterpreterCandidate {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Base command; callers append their own arguments
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.program).args(&self.args)
    }

    fn probe(&self) -> CommandSpec {
        self.command().args(["-c", VERSION_PROBE])
    }
}

impl fmt::Display for InterpreterCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Known command names in probe order for this platform
pub fn default_candidates() -> Vec<InterpreterCandidate> {
    if cfg!(windows) {
        vec![
            InterpreterCandidate::with_args("py", &["-3"]),
            InterpreterCandidate::new("python"),
            InterpreterCandidate::new("python3"),
        ]
    } else {
        vec![
            InterpreterCandidate::new("python3"),
            InterpreterCandidate::new("python"),
        ]
    }
}

/// The interpreter chosen to build the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub candidate: InterpreterCandidate,
    pub version: PythonVersion,
}

/// Ask a candidate for its version; `None` if it is unavailable
pub async fn probe<R: CommandRunner>(
    runner: &R,
    candidate: &InterpreterCandidate,
) -> Option<PythonVersion> {
    let output = match runner.capture(&candidate.probe()).await {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("{} unavailable: {}", candidate, e);
            return None;
        }
    };

    if !output.success() {
        tracing::debug!("{} exited with {}", candidate, output.code);
        return None;
    }

    let line = output.stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    match line.parse() {
        Ok(version) => Some(version),
        Err(e) => {
            tracing::debug!("{} printed an unexpected version: {}", candidate, e);
            None
        }
    }
}

/// Select the first available candidate whose version is in `range`
pub async fn discover<R: CommandRunner>(
    runner: &R,
    candidates: &[InterpreterCandidate],
    range: VersionRange,
) -> Result<Interpreter, InterpreterError> {
    let mut found = Vec::new();

    for candidate in candidates {
        let Some(version) = probe(runner, candidate).await else {
            continue;
        };

        if range.contains(version) {
            tracing::info!("Using Python {} ({})", version, candidate);
            return Ok(Interpreter {
                candidate: candidate.clone(),
                version,
            });
        }

        tracing::warn!("Skipping {}: Python {} is outside {}", candidate, version, range);
        found.push(format!("{} ({})", version, candidate));
    }

    if found.is_empty() {
        let searched = candidates
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(InterpreterError::NotFound { searched, range })
    } else {
        Err(InterpreterError::Incompatible {
            found: found.join(", "),
            range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{Reply, ScriptedRunner};

    fn scripted(versions: &'static [(&'static str, Option<&'static str>)]) -> ScriptedRunner {
        ScriptedRunner::new(move |spec| {
            let program = spec.program.to_string_lossy().into_owned();
            match versions.iter().find(|(name, _)| *name == program) {
                Some((_, Some(version))) => Reply::Output(0, format!("{}\n", version)),
                Some((_, None)) => Reply::Exit(1),
                None => Reply::NotFound,
            }
        })
    }

    fn candidates(names: &[&str]) -> Vec<InterpreterCandidate> {
        names.iter().map(|n| InterpreterCandidate::new(*n)).collect()
    }

    #[test]
    fn test_parse_version() {
        assert_eq!("3.11.4".parse::<PythonVersion>().unwrap(), PythonVersion::new(3, 11, 4));
        assert_eq!("3.9".parse::<PythonVersion>().unwrap(), PythonVersion::new(3, 9, 0));
        assert_eq!(" 3.13.0rc1\n".parse::<PythonVersion>().unwrap(), PythonVersion::new(3, 13, 0));
        assert!("three".parse::<PythonVersion>().is_err());
        assert!("3".parse::<PythonVersion>().is_err());
    }

    #[test]
    fn test_version_range() {
        let range = VersionRange::default();
        assert!(!range.contains(PythonVersion::new(3, 8, 18)));
        assert!(range.contains(PythonVersion::new(3, 9, 0)));
        assert!(range.contains(PythonVersion::new(3, 12, 7)));
        assert!(!range.contains(PythonVersion::new(3, 13, 0)));
        assert_eq!(range.to_string(), ">=3.9, <3.13");

        let open = VersionRange {
            min: (3, 10),
            max_exclusive: None,
        };
        assert!(open.contains(PythonVersion::new(4, 0, 0)));
        assert_eq!(open.to_string(), ">=3.10");
    }

    #[tokio::test]
    async fn test_selects_first_available_candidate() {
        let runner = scripted(&[("python3", Some("3.11.2")), ("python", Some("3.10.1"))]);
        let picked = discover(&runner, &candidates(&["py", "python3", "python"]), VersionRange::default())
            .await
            .unwrap();
        assert_eq!(picked.candidate.program, PathBuf::from("python3"));
        assert_eq!(picked.version, PythonVersion::new(3, 11, 2));

        // Reversed order picks the other interpreter
        let picked = discover(&runner, &candidates(&["python", "python3"]), VersionRange::default())
            .await
            .unwrap();
        assert_eq!(picked.candidate.program, PathBuf::from("python"));
    }

    #[tokio::test]
    async fn test_skips_out_of_range_and_broken_candidates() {
        let runner = scripted(&[
            ("python3", Some("3.8.10")),
            ("python", None),
            ("python3.11", Some("3.11.9")),
        ]);
        let picked = discover(
            &runner,
            &candidates(&["python3", "python", "python3.11"]),
            VersionRange::default(),
        )
        .await
        .unwrap();
        assert_eq!(picked.candidate.program, PathBuf::from("python3.11"));
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_not_found_when_nothing_runs() {
        let runner = scripted(&[]);
        let err = discover(&runner, &candidates(&["python3", "python"]), VersionRange::default())
            .await
            .unwrap_err();
        match err {
            InterpreterError::NotFound { searched, .. } => assert_eq!(searched, "python3, python"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_incompatible_when_no_version_in_range() {
        let runner = scripted(&[("python3", Some("3.8.10")), ("python", Some("2.7.18"))]);
        let err = discover(&runner, &candidates(&["python3", "python"]), VersionRange::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InterpreterError::Incompatible { .. }));
        assert!(err.to_string().contains(PYTHON_DOWNLOAD_URL));
    }

    #[tokio::test]
    async fn test_probe_uses_candidate_args() {
        let runner = ScriptedRunner::new(|_| Reply::Output(0, "noise\n3.12.1\n".into()));
        let candidate = InterpreterCandidate::with_args("py", &["-3"]);
        assert_eq!(probe(&runner, &candidate).await, Some(PythonVersion::new(3, 12, 1)));

        let calls = runner.calls();
        assert_eq!(calls[0].args[0], "-3");
        assert_eq!(calls[0].args[1], "-c");
    }
}
