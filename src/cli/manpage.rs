//! Man page rendering

use crate::cli::commands::Cli;
use crate::Result;
use clap::CommandFactory;
use std::io::Write;

/// Render the roff man page into `out`.
pub fn render_man_page<W: Write>(out: &mut W) -> Result<()> {
    let man = clap_mangen::Man::new(Cli::command());
    man.render(out)?;
    Ok(())
}

/// Print the man page to stdout.
pub fn generate_man_page() -> Result<()> {
    let mut buffer: Vec<u8> = Vec::new();
    render_man_page(&mut buffer)?;
    print!("{}", String::from_utf8(buffer)?);
    Ok(())
}
