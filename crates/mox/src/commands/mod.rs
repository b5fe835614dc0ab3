pub mod build;
pub mod extract;
pub mod info;
pub mod list;

use std::{fs::File, path::Path};

use miette::{Context, IntoDiagnostic, Result};
use moxillan::AccessStrategy;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Build a package from a directory
    Build(build::BuildArgs),
    /// Extract a package into a directory
    Extract(extract::ExtractArgs),
    /// Show the layout of a package
    Info(info::InfoArgs),
    /// List the contents of a package
    List(list::ListArgs),
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Build(build) => build.handle(),
            Commands::Extract(extract) => extract.handle(),
            Commands::Info(info) => info.handle(),
            Commands::List(list) => list.handle(),
        }
    }
}

/// How compressed files are read
#[derive(Debug, Default, Copy, Clone, clap::ValueEnum)]
pub enum Strategy {
    /// Inflate while copying
    #[default]
    Sequential,
    /// Inflate each file into memory first
    Random,
}

impl From<Strategy> for AccessStrategy {
    fn from(value: Strategy) -> Self {
        match value {
            Strategy::Sequential => AccessStrategy::Sequential,
            Strategy::Random => AccessStrategy::Random,
        }
    }
}

/// Creates `path`, refusing to replace an existing file unless `overwrite` is set
pub(crate) fn create_file(path: &Path, overwrite: bool) -> Result<File> {
    if !overwrite {
        File::create_new(path)
            .into_diagnostic()
            .context(format!("creating {}", path.display()))
    } else {
        File::create(path)
            .into_diagnostic()
            .context(format!("creating {}", path.display()))
    }
}

/// Opens and parses the package at `path`
pub(crate) fn open_package(path: &Path) -> Result<moxillan::Package<std::io::BufReader<File>>> {
    let file = File::open(path)
        .into_diagnostic()
        .context(format!("opening {}", path.display()))?;

    moxillan::Package::new(std::io::BufReader::new(file))
        .context(format!("reading {}", path.display()))
}
