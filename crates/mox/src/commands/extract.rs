use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use std::{fs, path::PathBuf};
use tracing::{debug, info};

use super::Strategy;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input package file
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    pub directory: PathBuf,

    /// Only extract entries below this path
    #[arg(short, long, value_name = "PATH")]
    pub path: Option<String>,

    /// How compressed files are read
    #[arg(long, value_enum, default_value_t)]
    pub strategy: Strategy,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let package = super::open_package(&self.file)?;

        let prefix = self
            .path
            .as_deref()
            .map(|p| p.replace('\\', "/").trim_matches('/').to_owned())
            .unwrap_or_default();

        let mut extracted = 0;
        for (path, node) in package.walk() {
            let selected = prefix.is_empty()
                || path == prefix
                || path.starts_with(&format!("{prefix}/"));
            if !selected {
                continue;
            }

            let target = self.directory.join(&path);
            if node.is_directory() {
                debug!("creating {}", target.display());
                fs::create_dir_all(&target)
                    .into_diagnostic()
                    .context(format!("creating {}", target.display()))?;
                continue;
            }

            info!("writing {}", target.display());
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .into_diagnostic()
                    .context(format!("creating {}", parent.display()))?;
            }

            let mut out = super::create_file(&target, self.overwrite)?;
            let mut file = package
                .open_file(node, self.strategy.into())
                .context(format!("opening {path}"))?;
            std::io::copy(&mut file, &mut out)
                .into_diagnostic()
                .context(format!("extracting {path}"))?;
            extracted += 1;
        }

        info!(extracted, "done");
        Ok(())
    }
}
