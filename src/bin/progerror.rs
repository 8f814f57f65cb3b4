use std::process;

use clap::Parser;
use progerror::{expected_kinds, Arg};

/// Print a program-name prefixed diagnostic on standard error, like error(3).
#[derive(Parser, Debug)]
#[command(name = "progerror", version)]
struct Cli {
    /// Exit with this status after printing (0 returns normally)
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    status: i32,

    /// System error code whose description is appended to the message
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    errnum: i32,

    /// Source file named before the message
    #[arg(short, long, requires = "line")]
    file: Option<String>,

    /// Line number within --file
    #[arg(short, long, requires = "file")]
    line: Option<u32>,

    /// Name printed instead of this program's invocation name
    #[arg(short, long)]
    name: Option<String>,

    /// C format string for the message
    format: String,

    /// Operands for the directives in FORMAT
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    operands: Vec<String>,
}

fn usage_error(message: &str) -> ! {
    progerror::error(2, 0, "%s", &[Arg::from(message)]);
    process::exit(2);
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(name) = &cli.name {
        progerror::set_program_name(name.as_str());
    }

    let kinds = match expected_kinds(&cli.format) {
        Ok(k) => k,
        Err(e) => usage_error(&e.to_string()),
    };
    if cli.operands.len() > kinds.len() {
        log::debug!(
            "ignoring {} extra operand(s)",
            cli.operands.len() - kinds.len()
        );
    }

    let mut args = Vec::with_capacity(kinds.len());
    for (i, kind) in kinds.iter().enumerate() {
        let arg = match cli.operands.get(i) {
            None => Arg::missing(*kind),
            Some(raw) => match Arg::parse_operand(raw, *kind) {
                Some(a) => a,
                None => usage_error(&format!("invalid number: {raw}")),
            },
        };
        args.push(arg);
    }

    match (&cli.file, cli.line) {
        (Some(file), Some(line)) => {
            progerror::error_at_line(cli.status, cli.errnum, file, line, &cli.format, &args)
        }
        _ => progerror::error(cli.status, cli.errnum, &cli.format, &args),
    }
}
