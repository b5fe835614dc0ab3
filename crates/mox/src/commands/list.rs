use clap::Args;
use miette::Result;
use owo_colors::{OwoColorize, Stream};
use std::path::PathBuf;

#[derive(Args)]
pub struct ListArgs {
    /// An input package file
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Show sizes and compression
    #[arg(short, long, default_value_t = false)]
    pub long: bool,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let package = super::open_package(&self.file)?;

        for (path, node) in package.walk() {
            let entry = package.node_info(node);

            let name = if entry.is_directory {
                format!("{path}/")
                    .if_supports_color(Stream::Stdout, |text| text.blue())
                    .to_string()
            } else {
                path
            };

            if !self.long {
                println!("{name}");
            } else if entry.is_directory {
                println!("{:>10} {:>10}  {name}", "-", "-");
            } else {
                let marker = if entry.is_compressed { "z" } else { " " };
                println!(
                    "{:>10} {:>10}{marker} {name}",
                    entry.size, entry.compressed_size
                );
            }
        }

        Ok(())
    }
}
