//! Renders `skylark.1` and one `skylark-<subcommand>.1` page per subcommand
//! into `OUT_DIR`.
//!
//! The pages come from the same clap definitions the binary parses, so a
//! packaged `man skylark-orchestrate` on the cron host matches the installed
//! flags.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    render_page(&Man::new(command.clone()), &out_dir.join("skylark.1"))?;
    for subcommand in command.get_subcommands() {
        let page = format!("skylark-{}", subcommand.get_name());
        render_page(
            &Man::new(subcommand.clone()).title(page.to_uppercase()),
            &out_dir.join(format!("{page}.1")),
        )?;
    }

    Ok(())
}

fn render_page(man: &Man, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    File::create(path)?.write_all(&buffer)?;
    Ok(())
}
