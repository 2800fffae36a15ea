use std::process::ExitCode;

use clap::Parser;

use staxie::cli::{self, CliArgs};
use staxie::config::EditorSettings;
use staxie::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init(args.verbose);
    let settings = EditorSettings::load();
    cli::run(args, &settings)
}
