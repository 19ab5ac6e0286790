use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info};

use stratadb::config::Config;
use stratadb::db::Db;
use stratadb::server::Server;

/// Go's `flag` package accepts both `-name` and `--name` for every flag;
/// clap's `.long()` only recognises the double-dash form. Rewrite a leading
/// single dash to double dash for our known long flags before clap ever
/// sees the arguments, so `-config`/`-dir_path` keep working exactly as
/// documented.
fn normalize_single_dash_flags(args: impl Iterator<Item = String>) -> Vec<String> {
    const LONG_FLAGS: &[&str] = &["config", "dir_path"];
    args.map(|arg| match LONG_FLAGS.iter().find(|name| arg == format!("-{name}") || arg.starts_with(&format!("-{name}="))) {
        Some(_) => format!("-{arg}"),
        None => arg,
    })
    .collect()
}

fn cli() -> ArgMatches {
    Command::new("stratadb-server")
        .about("An embeddable, Redis-flavoured key-value store backed by a segmented append-only log")
        .version("0.1.0")
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to a TOML config file")
                .value_parser(clap::builder::NonEmptyStringValueParser::new()),
        )
        .arg(
            Arg::new("dir_path")
                .long("dir_path")
                .help("Directory the database's segment files live in, overriding the config file")
                .value_parser(clap::builder::NonEmptyStringValueParser::new()),
        )
        .get_matches_from(normalize_single_dash_flags(std::env::args()))
}

fn load_config(matches: &ArgMatches) -> stratadb::error::Result<Config> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_toml_file(std::path::Path::new(path))?,
        None => Config::default(),
    };
    if let Some(dir_path) = matches.get_one::<String>("dir_path") {
        config.dir_path = std::path::PathBuf::from(dir_path);
    }
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let matches = cli();

    let config = match load_config(&matches) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(2);
        }
    };
    let addr = config.addr.clone();

    let db = match Db::open(config) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "failed to open database");
            return ExitCode::from(1);
        }
    };

    let server = match Server::bind(db.clone(), &addr) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to bind listener");
            return ExitCode::from(1);
        }
    };

    let shutdown = server.shutdown_flag();
    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGHUP, SIGQUIT]) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return ExitCode::from(1);
        }
    };
    std::thread::spawn(move || {
        for signal in signals.forever() {
            info!(signal, "received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
            break;
        }
    });

    if let Err(e) = server.serve() {
        error!(error = %e, "server loop exited with error");
        return ExitCode::from(1);
    }

    if let Err(e) = db.close() {
        error!(error = %e, "failed to close database cleanly");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(args: &[&str]) -> Vec<String> {
        normalize_single_dash_flags(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn single_dash_long_flags_become_double_dash() {
        assert_eq!(normalize(&["stratadb-server", "-config", "db.toml"]), vec!["stratadb-server", "--config", "db.toml"]);
        assert_eq!(normalize(&["stratadb-server", "-dir_path", "/tmp/db"]), vec!["stratadb-server", "--dir_path", "/tmp/db"]);
    }

    #[test]
    fn single_dash_long_flag_with_equals_is_rewritten() {
        assert_eq!(normalize(&["stratadb-server", "-config=db.toml"]), vec!["stratadb-server", "--config=db.toml"]);
    }

    #[test]
    fn double_dash_and_unrelated_args_pass_through() {
        assert_eq!(normalize(&["stratadb-server", "--config", "db.toml"]), vec!["stratadb-server", "--config", "db.toml"]);
        assert_eq!(normalize(&["stratadb-server", "-v"]), vec!["stratadb-server", "-v"]);
    }
}
