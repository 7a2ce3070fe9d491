use clap::{value_parser, Arg, ArgAction, Command};

fn year_arg() -> Arg {
    Arg::new("year")
        .long("year")
        .required(true)
        .value_parser(value_parser!(i32))
        .help("Calendar year")
}

fn dealership_arg() -> Arg {
    Arg::new("dealership")
        .long("dealership")
        .value_parser(value_parser!(u64))
        .help("Dealership id (defaults to TASKMATE_DEALERSHIP_ID)")
}

fn dry_run_arg() -> Arg {
    Arg::new("dry-run")
        .long("dry-run")
        .action(ArgAction::SetTrue)
        .help("Print the staged changes without saving them")
}

pub fn build_cli() -> Command {
    Command::new("taskmate")
        .about("TaskMate calendar and upload tooling")
        .disable_version_flag(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .num_args(1)
                .global(true)
                .help("Override RUST_LOG level (e.g., info, debug)"),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("holidays")
                .about("Show server holidays for a year")
                .arg(year_arg())
                .arg(dealership_arg()),
        )
        .subcommand(
            Command::new("toggle")
                .about("Flip dates between holiday and workday")
                .arg(year_arg())
                .arg(dealership_arg())
                .arg(dry_run_arg())
                .arg(
                    Arg::new("date")
                        .long("date")
                        .required(true)
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(chrono::NaiveDate))
                        .help("Date to toggle (YYYY-MM-DD); repeatable"),
                ),
        )
        .subcommand(
            Command::new("mark-weekdays")
                .about("Mark every matching weekday of the year as a holiday")
                .arg(year_arg())
                .arg(dealership_arg())
                .arg(dry_run_arg())
                .arg(
                    Arg::new("weekday")
                        .long("weekday")
                        .required(true)
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(u32).range(1..=7))
                        .help("ISO weekday, 1 = Monday .. 7 = Sunday; repeatable"),
                ),
        )
        .subcommand(
            Command::new("clear-year")
                .about("Turn every holiday of the year back into a workday")
                .arg(year_arg())
                .arg(dealership_arg())
                .arg(dry_run_arg()),
        )
        .subcommand(
            Command::new("validate-upload")
                .about("Check files against the proof-of-completion upload rules")
                .arg(
                    Arg::new("files")
                        .required(true)
                        .num_args(1..)
                        .value_parser(value_parser!(std::path::PathBuf)),
                ),
        )
}

pub fn init_logging(level: Option<&str>) {
    // Respect explicit level, else default to info, allow env override via RUST_LOG
    if let Some(lvl) = level {
        std::env::set_var("RUST_LOG", lvl);
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
