//! Dependency tiers
//!
//! Required packages must install or the launch fails. Optional packages are
//! attempted one by one; failures are recorded and the app starts without
//! them.

pub mod record;

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::Path;

use thiserror::Error;

use crate::interpreter::PythonVersion;
use crate::process::{self, CommandRunner, CommandSpec, ProcessError, RetryPolicy};
use crate::venv::VirtualEnv;

pub use record::OptionalFailureRecord;

const FIND_SPEC_SCRIPT: &str = "import importlib.util, sys\n\
for name in sys.argv[1:]:\n    \
    if importlib.util.find_spec(name) is None:\n        \
        print(name)";

/// Dependency errors
#[derive(Error, Debug)]
pub enum DepsError {
    #[error("{0}")]
    Process(#[from] ProcessError),

    #[error("Failed to install required packages ({packages}): {source}")]
    Required {
        packages: String,
        #[source]
        source: ProcessError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DepsError {
    /// The failing child process, if there was one
    pub fn process_error(&self) -> Option<&ProcessError> {
        match self {
            DepsError::Process(e) | DepsError::Required { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Required,
    Optional,
}

/// An importable module and the pip spec that provides it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub module: String,
    pub spec: String,
    pub tier: Tier,
}

impl Requirement {
    pub fn required(module: &str, spec: &str) -> Self {
        Self {
            module: module.to_string(),
            spec: spec.to_string(),
            tier: Tier::Required,
        }
    }

    pub fn optional(module: &str, spec: &str) -> Self {
        Self {
            module: module.to_string(),
            spec: spec.to_string(),
            tier: Tier::Optional,
        }
    }
}

/// Which feature set to provision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Core,
    MusicGen,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Core => "core",
            Profile::MusicGen => "musicgen",
        }
    }

    /// Profile recorded in an install sentinel; older sentinels count as core
    fn from_sentinel(content: &str) -> Self {
        match content.lines().next().map(str::trim) {
            Some("musicgen") => Profile::MusicGen,
            _ => Profile::Core,
        }
    }

    /// True when an install of `self` also satisfies `wanted`
    pub fn covers(&self, wanted: Profile) -> bool {
        *self == wanted || wanted == Profile::Core
    }
}

/// audiocraft wheels only exist below 3.12
pub fn musicgen_supported(version: PythonVersion) -> bool {
    (version.major, version.minor) < (3, 12)
}

/// Requirements for a profile on a given interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementSet {
    pub profile: Profile,
    pub required: Vec<Requirement>,
    pub optional: Vec<Requirement>,
}

impl RequirementSet {
    pub fn for_profile(profile: Profile, version: PythonVersion) -> Self {
        let required = vec![
            Requirement::required("streamlit", "streamlit"),
            Requirement::required("mido", "mido"),
            Requirement::required("pretty_midi", "pretty_midi"),
            Requirement::required("numpy", "numpy"),
            Requirement::required("pydub", "pydub"),
        ];

        let mut optional = vec![
            Requirement::optional("fluidsynth", "pyfluidsynth"),
            Requirement::optional("rtmidi", "python-rtmidi"),
            Requirement::optional("imageio_ffmpeg", "imageio-ffmpeg"),
        ];

        if profile == Profile::MusicGen {
            if musicgen_supported(version) {
                optional.extend([
                    Requirement::optional("torch", "torch"),
                    Requirement::optional("torchaudio", "torchaudio"),
                    Requirement::optional("audiocraft", "audiocraft"),
                ]);
            } else {
                tracing::warn!(
                    "MusicGen needs Python < 3.12 (found {}); skipping audiocraft",
                    version
                );
            }
        }

        Self {
            profile,
            required,
            optional,
        }
    }
}

/// Profile of the last completed install, if any
pub fn installed_profile(venv: &VirtualEnv) -> Option<Profile> {
    let content = std::fs::read_to_string(venv.deps_sentinel()).ok()?;
    Some(Profile::from_sentinel(&content))
}

/// What `ensure` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallReport {
    /// Sentinel present, nothing to do
    Skipped,
    Installed { optional_failures: Vec<String> },
}

/// Installs requirement tiers into a virtual environment
pub struct DependencyInstaller<'a, R: CommandRunner> {
    runner: &'a R,
    venv: &'a VirtualEnv,
    project_root: &'a Path,
    retry: RetryPolicy,
}

impl<'a, R: CommandRunner> DependencyInstaller<'a, R> {
    pub fn new(runner: &'a R, venv: &'a VirtualEnv, project_root: &'a Path, retry: RetryPolicy) -> Self {
        Self {
            runner,
            venv,
            project_root,
            retry,
        }
    }

    /// Install unless already done; `force` reinstalls and upgrades
    pub async fn ensure(&self, set: &RequirementSet, force: bool) -> Result<InstallReport, DepsError> {
        let sentinel = self.venv.deps_sentinel();
        if !force {
            if let Some(installed) = installed_profile(self.venv) {
                if installed.covers(set.profile) {
                    tracing::info!("Dependencies already installed – skipping install step.");
                    return Ok(InstallReport::Skipped);
                }
                tracing::info!("Adding {} dependencies to the existing environment …", set.profile.as_str());
            }
        }

        match self.install(set, force).await {
            Ok(report) => Ok(report),
            Err(e) => {
                // Force a fresh attempt on the next launch
                if let Err(rm) = std::fs::remove_file(&sentinel) {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("Could not remove {}: {}", sentinel.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn install(&self, set: &RequirementSet, upgrade: bool) -> Result<InstallReport, DepsError> {
        tracing::info!("Upgrading pip and build backends …");
        let bootstrap = self.pip_install(true).args(["pip", "setuptools", "wheel"]);
        process::run_with_retry(self.runner, &bootstrap, self.retry).await?;

        if self.has_project_metadata() {
            tracing::info!("Installing project dependencies – this might take a while on first launch …");
            let project = self
                .pip_install(upgrade)
                .arg(".[audio]")
                .current_dir(self.project_root);
            process::run_with_retry(self.runner, &project, self.retry).await?;
        }

        let missing_required = self.missing(&set.required).await?;
        if !missing_required.is_empty() {
            let specs: Vec<&str> = missing_required.iter().map(|r| r.spec.as_str()).collect();
            tracing::info!("Installing required packages: {}", specs.join(", "));
            let command = self.pip_install(upgrade).args(&specs);
            process::run_with_retry(self.runner, &command, self.retry)
                .await
                .map_err(|source| DepsError::Required {
                    packages: specs.join(", "),
                    source,
                })?;
        }

        let mut optional_failures = Vec::new();
        for requirement in self.missing(&set.optional).await? {
            tracing::info!("Installing optional package {} …", requirement.spec);
            let command = self.pip_install(upgrade).arg(&requirement.spec);
            if let Err(e) = process::run_with_retry(self.runner, &command, self.retry).await {
                tracing::warn!(
                    "Optional package {} could not be installed; continuing without it: {}",
                    requirement.spec,
                    e
                );
                optional_failures.push(requirement.spec.clone());
            }
        }

        OptionalFailureRecord::store(optional_failures.clone(), &self.venv.optional_failures_path())?;
        let stamp = format!("{}\n{}\n", set.profile.as_str(), chrono::Utc::now().to_rfc3339());
        std::fs::write(self.venv.deps_sentinel(), stamp)?;

        Ok(InstallReport::Installed { optional_failures })
    }

    fn pip_install(&self, upgrade: bool) -> CommandSpec {
        let spec = CommandSpec::new(self.venv.python()).args(["-m", "pip", "install"]);
        if upgrade {
            spec.arg("--upgrade")
        } else {
            spec
        }
    }

    fn has_project_metadata(&self) -> bool {
        self.project_root.join("pyproject.toml").is_file() || self.project_root.join("setup.py").is_file()
    }

    /// Requirements whose module cannot be imported in the environment
    async fn missing(&self, requirements: &[Requirement]) -> Result<Vec<Requirement>, DepsError> {
        if requirements.is_empty() {
            return Ok(Vec::new());
        }

        let modules: Vec<OsString> = requirements.iter().map(|r| OsString::from(&r.module)).collect();
        let probe = CommandSpec::new(self.venv.python())
            .args(["-c", FIND_SPEC_SCRIPT])
            .args(&modules);
        let output = self.runner.capture(&probe).await?;

        if !output.success() {
            tracing::warn!("Module probe exited with {}; assuming everything is missing", output.code);
            return Ok(requirements.to_vec());
        }

        let missing: HashSet<&str> = output.stdout.lines().map(str::trim).collect();
        Ok(requirements
            .iter()
            .filter(|r| missing.contains(r.module.as_str()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{Reply, ScriptedRunner};
    use std::path::PathBuf;

    fn scratch(name: &str) -> (PathBuf, VirtualEnv) {
        let dir = std::env::temp_dir().join(format!("lofi_launcher_deps_{}", name));
        std::fs::remove_dir_all(&dir).ok();
        let venv = VirtualEnv::new(dir.join(".lofi_venv"));
        std::fs::create_dir_all(venv.root()).unwrap();
        (dir, venv)
    }

    fn is_probe(spec: &CommandSpec) -> bool {
        spec.args.first().map(|a| a == "-c").unwrap_or(false)
    }

    const PY311: PythonVersion = PythonVersion::new(3, 11, 4);

    #[test]
    fn test_musicgen_profile_adds_optional_tier() {
        let core = RequirementSet::for_profile(Profile::Core, PY311);
        let musicgen = RequirementSet::for_profile(Profile::MusicGen, PY311);
        assert_eq!(core.required, musicgen.required);
        assert!(musicgen.optional.iter().any(|r| r.spec == "audiocraft"));
        assert!(!core.optional.iter().any(|r| r.spec == "audiocraft"));
        assert!(musicgen.optional.iter().all(|r| r.tier == Tier::Optional));
    }

    #[test]
    fn test_musicgen_skipped_on_new_python() {
        let set = RequirementSet::for_profile(Profile::MusicGen, PythonVersion::new(3, 12, 0));
        assert!(!set.optional.iter().any(|r| r.spec == "torch"));
    }

    #[tokio::test]
    async fn test_optional_failure_is_non_fatal() {
        let (dir, venv) = scratch("optional");
        let runner = ScriptedRunner::new(|spec| {
            if is_probe(spec) {
                // Required modules all importable, optional ones missing
                let missing: Vec<String> = spec.args[2..]
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .filter(|m| m == "torch" || m == "fluidsynth")
                    .collect();
                return Reply::Output(0, missing.join("\n"));
            }
            if spec.has_arg("torch==2.1.2") {
                Reply::Exit(1)
            } else {
                Reply::Exit(0)
            }
        });

        let set = RequirementSet {
            profile: Profile::Core,
            required: vec![Requirement::required("streamlit", "streamlit")],
            optional: vec![
                Requirement::optional("fluidsynth", "pyfluidsynth"),
                Requirement::optional("torch", "torch==2.1.2"),
            ],
        };
        let installer = DependencyInstaller::new(&runner, &venv, &dir, RetryPolicy::none());
        let report = installer.ensure(&set, false).await.unwrap();

        assert_eq!(
            report,
            InstallReport::Installed {
                optional_failures: vec!["torch==2.1.2".to_string()]
            }
        );
        assert!(venv.deps_sentinel().exists());
        let record = OptionalFailureRecord::load(&venv.optional_failures_path()).unwrap();
        assert_eq!(record.packages, vec!["torch==2.1.2".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_required_failure_clears_sentinel() {
        let (dir, venv) = scratch("required");
        std::fs::write(venv.deps_sentinel(), "stale").unwrap();

        let runner = ScriptedRunner::new(|spec| {
            if is_probe(spec) {
                Reply::Output(0, "streamlit\n".into())
            } else if spec.has_arg("streamlit") {
                Reply::Exit(3)
            } else {
                Reply::Exit(0)
            }
        });
        let set = RequirementSet {
            profile: Profile::Core,
            required: vec![Requirement::required("streamlit", "streamlit")],
            optional: Vec::new(),
        };
        let installer = DependencyInstaller::new(&runner, &venv, &dir, RetryPolicy::none());
        let err = installer.ensure(&set, true).await.unwrap_err();

        assert!(matches!(
            err,
            DepsError::Required {
                source: ProcessError::Failed { code: 3, .. },
                ..
            }
        ));
        assert!(!venv.deps_sentinel().exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_sentinel_skips_install() {
        let (dir, venv) = scratch("sentinel");
        std::fs::write(venv.deps_sentinel(), "done").unwrap();

        let runner = ScriptedRunner::new(|_| Reply::Exit(0));
        let set = RequirementSet::for_profile(Profile::Core, PY311);
        let installer = DependencyInstaller::new(&runner, &venv, &dir, RetryPolicy::none());

        assert_eq!(installer.ensure(&set, false).await.unwrap(), InstallReport::Skipped);
        assert!(runner.calls().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_installs_project_when_metadata_present() {
        let (dir, venv) = scratch("project");
        std::fs::write(dir.join("pyproject.toml"), "[project]\nname = \"lofi\"\n").unwrap();

        let runner = ScriptedRunner::new(|spec| {
            if is_probe(spec) {
                Reply::Output(0, String::new())
            } else {
                Reply::Exit(0)
            }
        });
        let set = RequirementSet::for_profile(Profile::Core, PY311);
        let installer = DependencyInstaller::new(&runner, &venv, &dir, RetryPolicy::none());
        installer.ensure(&set, false).await.unwrap();

        let calls = runner.calls();
        let project = calls.iter().find(|c| c.has_arg(".[audio]")).unwrap();
        assert_eq!(project.cwd.as_deref(), Some(dir.as_path()));
        assert!(!project.has_arg("--upgrade"));
        assert!(!venv.optional_failures_path().exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_failed_probe_installs_everything() {
        let (dir, venv) = scratch("probe");
        let runner = ScriptedRunner::new(|spec| {
            if is_probe(spec) {
                Reply::Exit(1)
            } else {
                Reply::Exit(0)
            }
        });
        let set = RequirementSet {
            profile: Profile::Core,
            required: vec![
                Requirement::required("mido", "mido"),
                Requirement::required("numpy", "numpy"),
            ],
            optional: Vec::new(),
        };
        let installer = DependencyInstaller::new(&runner, &venv, &dir, RetryPolicy::none());
        installer.ensure(&set, false).await.unwrap();

        let batch = runner
            .calls()
            .into_iter()
            .find(|c| c.has_arg("mido"))
            .unwrap();
        assert!(batch.has_arg("numpy"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_musicgen_profile_extends_core_install() {
        let (dir, venv) = scratch("profile");
        std::fs::write(venv.deps_sentinel(), "core\n2024-01-01T00:00:00Z\n").unwrap();
        assert_eq!(installed_profile(&venv), Some(Profile::Core));

        let runner = ScriptedRunner::new(|spec| {
            if is_probe(spec) {
                Reply::Output(0, String::new())
            } else {
                Reply::Exit(0)
            }
        });
        let installer = DependencyInstaller::new(&runner, &venv, &dir, RetryPolicy::none());

        let core = RequirementSet::for_profile(Profile::Core, PY311);
        assert_eq!(installer.ensure(&core, false).await.unwrap(), InstallReport::Skipped);

        let musicgen = RequirementSet::for_profile(Profile::MusicGen, PY311);
        let report = installer.ensure(&musicgen, false).await.unwrap();
        assert!(matches!(report, InstallReport::Installed { .. }));
        assert_eq!(installed_profile(&venv), Some(Profile::MusicGen));

        // A MusicGen install satisfies later core launches
        assert_eq!(installer.ensure(&core, false).await.unwrap(), InstallReport::Skipped);

        std::fs::remove_dir_all(&dir).ok();
    }
}
