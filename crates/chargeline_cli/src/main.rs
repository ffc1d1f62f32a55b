//! CLI probe for `chargeline_core`.
//!
//! # Responsibility
//! - Verify core linkage without any host process.
//! - Optionally open a database and report the active account count.

use chargeline_core::db::open_db;
use chargeline_core::{
    init_logging_from_config, AccountSearch, CoreConfig, Repository, SqliteAccountRepository,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "chargeline_cli")]
#[command(version, about = "Chargeline account core probe")]
struct Args {
    /// JSON config file; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database to open. Falls back to `database_path` from the config.
    database: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    println!("chargeline_core ping={}", chargeline_core::ping());
    println!("chargeline_core version={}", chargeline_core::core_version());

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    let config = match args.config {
        Some(path) => CoreConfig::load(path).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };
    init_logging_from_config(&config.logging)?;

    let Some(db_path) = args.database.or(config.database_path.clone()) else {
        return Ok(());
    };

    let conn = open_db(&db_path).map_err(|err| err.to_string())?;
    let repo = SqliteAccountRepository::with_config(&conn, config.accounts.clone())
        .map_err(|err| err.to_string())?;
    let active = repo
        .count(&AccountSearch::new())
        .map_err(|err| err.to_string())?;
    println!("accounts active={active}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Args;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn accepts_config_and_database() {
        let args =
            Args::try_parse_from(["chargeline_cli", "--config", "core.json", "accounts.db"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("core.json")));
        assert_eq!(args.database, Some(PathBuf::from("accounts.db")));
    }

    #[test]
    fn everything_is_optional() {
        let args = Args::try_parse_from(["chargeline_cli"]).unwrap();
        assert_eq!(args.config, None);
        assert_eq!(args.database, None);
    }

    #[test]
    fn rejects_missing_config_value_and_extra_positionals() {
        assert!(Args::try_parse_from(["chargeline_cli", "--config"]).is_err());
        assert!(Args::try_parse_from(["chargeline_cli", "a.db", "b.db"]).is_err());
    }

    #[test]
    fn run_without_database_is_a_no_op() {
        super::run(Args {
            config: None,
            database: None,
        })
        .unwrap();
    }
}
