use clap::Args;
use itertools::Itertools;
use miette::Result;
use std::path::PathBuf;

#[derive(Args)]
pub struct InfoArgs {
    /// An input package file
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,
}

impl InfoArgs {
    pub fn handle(&self) -> Result<()> {
        let package = super::open_package(&self.file)?;
        let info = package.info();

        let (directories, files) = package
            .walk()
            .map(|(_, node)| node)
            .partition::<Vec<_>, _>(|node| node.is_directory());
        let compressed = files
            .iter()
            .filter_map(|node| node.location())
            .filter(|location| location.compressed)
            .count();

        let mut features = Vec::new();
        if info.file_table_compressed {
            features.push("compressed file table");
        }
        if compressed > 0 {
            features.push("compressed files");
        }

        println!("version:           {:#06x}", info.version);
        println!("header length:     {}", info.header_length);
        println!("file table length: {}", info.file_table_length);
        println!("data length:       {}", info.data_length);
        println!("directories:       {}", directories.len());
        println!("files:             {} ({} compressed)", files.len(), compressed);
        if !features.is_empty() {
            println!("features:          {}", features.iter().join(", "));
        }

        Ok(())
    }
}
