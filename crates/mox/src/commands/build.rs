use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use moxillan::{
    build_package, compression::MAX_LEVEL, source::NativeDirectory, write::DEFAULT_LEVEL,
    BuildOptions,
};
use std::{
    io::{BufWriter, Write},
    path::PathBuf,
};
use tracing::info;

#[derive(Args)]
pub struct BuildArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    pub directory: PathBuf,

    /// A target package file
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Compression level for files, 0 stores them as they are
    #[arg(short, long, default_value_t = DEFAULT_LEVEL, value_parser = clap::value_parser!(u32).range(0..=MAX_LEVEL as i64))]
    pub level: u32,

    /// Compression level for the file table
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=MAX_LEVEL as i64))]
    pub table_level: u32,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}

impl BuildArgs {
    pub fn handle(&self) -> Result<()> {
        info!("creating {}", &self.file.display());

        if !self.directory.is_dir() {
            return Err(miette!("{} is not a directory", self.directory.display()));
        }

        let root = NativeDirectory::new(&self.directory)
            .context(format!("listing {}", self.directory.display()))?;

        let out = super::create_file(&self.file, self.overwrite)?;
        let options = BuildOptions::builder()
            .level(self.level)
            .table_level(self.table_level)
            .build();

        let mut out = build_package(&root, BufWriter::new(out), options)
            .context(format!("building {}", self.file.display()))?;
        out.flush().into_diagnostic()?;

        Ok(())
    }
}
