use clap::Parser;
use skinstack::cli;

fn main() -> std::process::ExitCode {
    cli::run(cli::CliArgs::parse())
}
