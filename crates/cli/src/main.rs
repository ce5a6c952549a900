use std::process::ExitCode;

fn main() -> ExitCode {
    keyturn_cli::run()
}
