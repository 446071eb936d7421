//! Command-line flags
//!
//! The launcher must work when double-clicked, so every flag is optional.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(
    name = "lofi-launcher",
    version,
    about = "Prepare and launch the LofiSymphony app.",
    after_help = "Arguments after '--' are forwarded to Streamlit, e.g. lofi-launcher -- --server.headless true"
)]
pub struct Cli {
    /// Install dependencies and exit without starting the Streamlit server
    #[arg(long, group = "mode")]
    pub prepare_only: bool,

    /// Delete the managed virtual environment before installing dependencies
    #[arg(long)]
    pub reset: bool,

    /// Reinstall the Python dependencies even if they are already present
    #[arg(long)]
    pub upgrade: bool,

    /// Install audiocraft and prefetch MusicGen weights
    #[arg(long)]
    pub musicgen: bool,

    /// Do not download FluidSynth or the default soundfont
    #[arg(long)]
    pub skip_assets: bool,

    /// Fetch FluidSynth and the default soundfont, then exit
    #[arg(long, group = "mode", conflicts_with = "skip_assets")]
    pub assets_only: bool,

    /// Download a soundfont from the curated catalog, then exit
    #[arg(long, value_name = "SLUG", group = "mode")]
    pub download_soundfont: Option<String>,

    /// Show the curated soundfont catalog, then exit
    #[arg(long, group = "mode")]
    pub list_soundfonts: bool,

    /// Soundfont to use ahead of every discovered one
    #[arg(long, value_name = "PATH")]
    pub soundfont: Option<PathBuf>,

    /// Python interpreter to try before the built-in candidates
    #[arg(long, value_name = "CMD")]
    pub python: Option<PathBuf>,

    /// Directory containing the LofiSymphony sources
    #[arg(long, value_name = "DIR")]
    pub project_root: Option<PathBuf>,

    /// Exit without waiting for Enter
    #[arg(long)]
    pub no_pause: bool,

    /// Log every command the launcher runs
    #[arg(short, long)]
    pub verbose: bool,

    #[arg(last = true, value_name = "STREAMLIT_ARGS")]
    pub ui_args: Vec<OsString>,
}

/// What a run of the launcher is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Launch,
    PrepareOnly,
    AssetsOnly,
    DownloadSoundfont(String),
    ListSoundfonts,
}

impl Cli {
    pub fn action(&self) -> Action {
        if self.list_soundfonts {
            Action::ListSoundfonts
        } else if let Some(slug) = &self.download_soundfont {
            Action::DownloadSoundfont(slug.clone())
        } else if self.assets_only {
            Action::AssetsOnly
        } else if self.prepare_only {
            Action::PrepareOnly
        } else {
            Action::Launch
        }
    }
}
