//! Build script rendering the `arrayctl` man pages with clap-mangen.
//!
//! Writes `arrayctl.1` plus one `arrayctl-<group>.1` page per command group
//! into `OUT_DIR` for packaging.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render(command: clap::Command, title: &str, out_dir: &Path) -> Result<(), Box<dyn Error>> {
    let mut page = Vec::new();
    Man::new(command)
        .title(title.to_uppercase())
        .render(&mut page)?;
    fs::write(out_dir.join(format!("{title}.1")), page)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(
        env::var_os("OUT_DIR")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?,
    );

    let root = cli::Cli::command();
    for group in root.get_subcommands() {
        let title = format!("arrayctl-{}", group.get_name());
        render(group.clone(), &title, &out_dir)?;
    }
    render(root, "arrayctl", &out_dir)
}
