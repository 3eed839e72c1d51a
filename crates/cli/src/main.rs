use std::process::ExitCode;

fn main() -> ExitCode {
    agis_cli::run()
}
