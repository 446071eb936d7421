//! Final status line and the "press Enter" pause
//!
//! Double-clicked launchers get a console window that vanishes on exit, so
//! the outcome is always printed and acknowledged before returning.

use std::io::{self, BufRead, Write};

use crate::bootstrap::Outcome;
use crate::{LauncherError, RETRY_HINT};

pub const FAILURE_MESSAGE: &str = "Launch failed. Review the messages above for details.";
pub const CLOSED_MESSAGE: &str = "LofiSymphony closed.";
pub const PREPARED_MESSAGE: &str =
    "Environment ready. You can launch the app later by running the launcher again.";
pub const PAUSE_PROMPT: &str = "Press Enter to close this window…";

pub struct Terminal<I, O> {
    input: I,
    output: O,
    pause: bool,
}

impl Terminal<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio(pause: bool) -> Self {
        Self::new(io::stdin().lock(), io::stdout(), pause)
    }
}

impl<I: BufRead, O: Write> Terminal<I, O> {
    pub fn new(input: I, output: O, pause: bool) -> Self {
        Self { input, output, pause }
    }

    /// Report the result, wait for acknowledgment and return the process exit code
    pub fn finish(&mut self, result: &Result<Outcome, LauncherError>) -> i32 {
        if let Err(e) = self.write_status(result) {
            tracing::warn!("Could not write the final status: {}", e);
        }
        if self.pause {
            self.acknowledge();
        }

        match result {
            Ok(Outcome::UiExited(code)) => *code,
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }

    fn write_status(&mut self, result: &Result<Outcome, LauncherError>) -> io::Result<()> {
        let out = &mut self.output;
        writeln!(out)?;
        match result {
            Ok(Outcome::UiExited(0)) => writeln!(out, "{}", CLOSED_MESSAGE)?,
            Ok(Outcome::UiExited(code)) => {
                writeln!(out, "{}", FAILURE_MESSAGE)?;
                writeln!(out, "The app exited with status {}.", code)?;
                writeln!(out, "{}", RETRY_HINT)?;
            }
            Ok(Outcome::Prepared) => writeln!(out, "{}", PREPARED_MESSAGE)?,
            Ok(Outcome::AssetsReady(assets)) => {
                let describe = |path: &Option<std::path::PathBuf>| {
                    path.as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "not available".to_string())
                };
                writeln!(out, "FluidSynth: {}", describe(&assets.fluidsynth))?;
                writeln!(out, "Soundfont:  {}", describe(&assets.soundfont))?;
            }
            Ok(Outcome::SoundfontDownloaded(path)) => {
                writeln!(out, "Soundfont saved to {}.", path.display())?
            }
            Ok(Outcome::Catalog(entries)) => {
                writeln!(out, "Available soundfonts:")?;
                for entry in entries.iter() {
                    writeln!(
                        out,
                        "  {:<12} {:<22} {:>8}  {}",
                        entry.slug,
                        entry.name,
                        entry.size_label(),
                        entry.license
                    )?;
                }
                writeln!(out, "Download one with --download-soundfont <slug>.")?;
            }
            Err(e) => {
                writeln!(out, "{}", FAILURE_MESSAGE)?;
                writeln!(out, "Error: {}", e)?;
                if let Some(hint) = e.remediation() {
                    writeln!(out, "{}", hint)?;
                }
            }
        }
        out.flush()
    }

    fn acknowledge(&mut self) {
        if write!(self.output, "{} ", PAUSE_PROMPT)
            .and_then(|_| self.output.flush())
            .is_err()
        {
            return;
        }
        // EOF counts as acknowledgment
        let mut line = String::new();
        self.input.read_line(&mut line).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AudioAssets;
    use crate::interpreter::{InterpreterError, VersionRange};
    use crate::process::ProcessError;
    use crate::venv::VenvError;

    fn render(result: Result<Outcome, LauncherError>, pause: bool) -> (i32, String) {
        let mut output = Vec::new();
        let code = Terminal::new(&b""[..], &mut output, pause).finish(&result);
        (code, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_success_prints_status_and_prompt() {
        let (code, text) = render(Ok(Outcome::UiExited(0)), true);
        assert_eq!(code, 0);
        assert!(text.contains(CLOSED_MESSAGE));
        assert!(text.contains(PAUSE_PROMPT));
    }

    #[test]
    fn test_failure_prints_status_and_prompt() {
        let err = LauncherError::Interpreter(InterpreterError::NotFound {
            searched: "python3, python".into(),
            range: VersionRange::default(),
        });
        let (code, text) = render(Err(err), true);
        assert_eq!(code, 1);
        assert!(text.contains(FAILURE_MESSAGE));
        assert!(text.contains("https://www.python.org/downloads/"));
        assert!(text.contains(PAUSE_PROMPT));
    }

    #[test]
    fn test_child_status_is_relayed() {
        let (code, text) = render(Ok(Outcome::UiExited(3)), false);
        assert_eq!(code, 3);
        assert!(text.contains(FAILURE_MESSAGE));
        assert!(text.contains("exited with status 3"));
        assert!(text.contains(RETRY_HINT));
        assert!(!text.contains(CLOSED_MESSAGE));

        let err = LauncherError::Venv(VenvError::Process(ProcessError::Failed {
            command: "python3 -m venv .lofi_venv".into(),
            code: 2,
        }));
        let (code, text) = render(Err(err), false);
        assert_eq!(code, 2);
        assert!(text.contains("--reset"));
    }

    #[test]
    fn test_no_pause_skips_prompt() {
        let (code, text) = render(Ok(Outcome::Prepared), false);
        assert_eq!(code, 0);
        assert!(text.contains(PREPARED_MESSAGE));
        assert!(!text.contains(PAUSE_PROMPT));
    }

    #[test]
    fn test_waits_for_one_line() {
        let mut input = &b"\nleftover\n"[..];
        let mut output = Vec::new();
        Terminal::new(&mut input, &mut output, true).finish(&Ok(Outcome::UiExited(0)));
        assert_eq!(input, b"leftover\n");
    }

    #[test]
    fn test_assets_and_catalog_output() {
        let assets = AudioAssets {
            fluidsynth: Some("/opt/fluidsynth".into()),
            soundfont: None,
        };
        let (_, text) = render(Ok(Outcome::AssetsReady(assets)), false);
        assert!(text.contains("FluidSynth: /opt/fluidsynth"));
        assert!(text.contains("Soundfont:  not available"));

        let (_, text) = render(Ok(Outcome::Catalog(crate::assets::soundfont::catalog())), false);
        assert!(text.contains("timgm6mb"));
        assert!(text.contains("22.6 MB"));
    }
}
