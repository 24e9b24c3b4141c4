use std::process::ExitCode;

use clap::Parser;
use inpaintfe::settings::MaskSettings;
use inpaintfe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init();
    if !args.verbose {
        logger::set_min_level(logger::Level::Warn);
    }

    let mut settings = MaskSettings::load();
    cli::run(args, &mut settings)
}
