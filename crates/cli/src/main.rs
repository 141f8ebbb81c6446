use std::process::ExitCode;

fn main() -> ExitCode {
    teamsforce_cli::run()
}
