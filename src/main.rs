mod cli;
mod commands;

use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")] // CLI drives one request chain at a time
async fn main() -> anyhow::Result<ExitCode> {
    let cmd = cli::build_cli();
    let matches = cmd.get_matches();
    let log_level = matches.get_one::<String>("log-level").cloned();
    let version_flag = matches.get_flag("version");

    cli::init_logging(log_level.as_deref());

    if version_flag {
        println!("taskmate {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let Some((name, sub)) = matches.subcommand() else {
        cli::build_cli().print_help()?;
        return Ok(ExitCode::from(2));
    };
    commands::run(name, sub).await
}
