mod cli;
mod exit_codes;
mod init;
mod logging;
mod output;
mod run;
mod run_error;
mod workload_yaml;

use clap::Parser;
use mimalloc::MiMalloc;

use exit_codes::ExitCode;
use run_error::RunError;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        std::process::exit(parse_error_code(&err).as_i32())
    });

    logging::init_logging(cli.log_level.as_deref());

    let outcome = match cli.command {
        cli::Command::Run(args) => run::run(args).await,
        cli::Command::Init(args) => init::init(args)
            .await
            .map(|()| ExitCode::Success)
            .map_err(RunError::RuntimeError),
    };
    let code = outcome.unwrap_or_else(|err| {
        eprintln!("{err}");
        err.exit_code()
    });

    std::process::exit(code.as_i32());
}

/// `--help` and `--version` are successful exits; every other parse failure is bad input.
fn parse_error_code(err: &clap::Error) -> ExitCode {
    use clap::error::ErrorKind;
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
        _ => ExitCode::InvalidInput,
    }
}
