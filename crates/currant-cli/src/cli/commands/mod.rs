use crate::cli::args::{Cli, Command};
use currant_core::config::{load_config, EngineConfig};
use currant_core::Engine;

pub mod events;
pub mod maintenance;
pub mod prioritize;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const CONFIG_ERROR: i32 = 2;
}

/// Config file, then `CURRANT_*` environment, then command-line flags.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let base = match &cli.config {
        Some(path) => load_config(path, false)?,
        None => EngineConfig::default(),
    };
    let mut cfg = base.overlay_env();
    if let Some(db) = &cli.db {
        cfg.db_path = db.clone();
    }
    if let Some(n) = cli.max_missing {
        cfg.max_missing = n;
    }
    if let Some(level) = &cli.log_level {
        cfg.log_level = level.clone();
    }
    Ok(cfg)
}

fn open_engine(cfg: EngineConfig) -> anyhow::Result<Engine> {
    Engine::open(cfg, currant_metrics::standard_handlers())
}

/// Runs the command against an already resolved config; `main` resolves it
/// first so the config's log level can drive logging.
pub fn dispatch(cli: Cli, resolved: anyhow::Result<EngineConfig>) -> anyhow::Result<i32> {
    if let Command::Version = cli.cmd {
        println!("currant {}", env!("CARGO_PKG_VERSION"));
        return Ok(exit_codes::OK);
    }

    let cfg = match resolved {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    tracing::debug!(
        event = "currant.cli.config",
        db = %cfg.db_path.display(),
        max_missing = cfg.max_missing,
        "resolved config"
    );
    let mut engine = match open_engine(cfg) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to open store: {e:#}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let code = match cli.cmd {
        Command::Prioritize(args) => prioritize::run(&engine, args)?,
        Command::Started(args) => events::started(&mut engine, args),
        Command::Finished(args) => events::finished(&mut engine, args),
        Command::TestsetStart(args) => events::testset_start(&mut engine, args),
        Command::TestsetFinish(args) => events::testset_finish(&mut engine, args),
        Command::Train => maintenance::train(&mut engine),
        Command::Dump => maintenance::dump(&engine),
        Command::Reset => maintenance::reset(&engine)?,
        Command::Version => exit_codes::OK,
    };
    engine.close();
    Ok(code)
}
