use clap::Parser;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::args::Cli;
use cli::commands::{dispatch, exit_codes, resolve_config};

fn build_subscriber(level: Option<&str>, json: bool) -> Box<dyn Subscriber + Send + Sync> {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    }
}

fn main() {
    let cli = Cli::parse();

    // Config loading logs through a subscriber built from the flag or
    // environment; the global one uses the resolved level.
    let boot = build_subscriber(cli.log_level.as_deref(), cli.log_json);
    let resolved = tracing::subscriber::with_default(boot, || resolve_config(&cli));
    let level = match &resolved {
        Ok(cfg) => Some(cfg.log_level.clone()),
        Err(_) => cli.log_level.clone(),
    };
    if let Err(e) =
        tracing::subscriber::set_global_default(build_subscriber(level.as_deref(), cli.log_json))
    {
        eprintln!("warning: logging disabled: {e}");
    }

    let code = match dispatch(cli, resolved) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            exit_codes::CONFIG_ERROR
        }
    };
    std::process::exit(code);
}
