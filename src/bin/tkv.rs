use clap::{Arg, Command as ClapCommand};
use std::env::current_dir;
use std::process::exit;
use stderrlog::{self, LogLevelNum, Timestamp};
use tkv::{Router, RouterConfig};

const COMPACT_FILE: &str = "compact.kvs";
const SHARD_PREFIX: &str = "db";
const CONFIG_FILE: &str = "tkv-config.json";

fn open_router() -> tkv::Result<Router> {
    let dir = current_dir().map_err(|e| tkv::KvError::io(".", e))?;
    let config_path = dir.join(CONFIG_FILE);
    let config =
        RouterConfig::load_or_init(&config_path, dir.join(COMPACT_FILE), dir.join(SHARD_PREFIX))?;
    Router::open(config)
}

fn main() -> tkv::Result<()> {
    stderrlog::new()
        .module(module_path!())
        .timestamp(Timestamp::Second)
        .verbosity(LogLevelNum::Info)
        .init()
        .unwrap();

    let matches = ClapCommand::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .disable_help_subcommand(true)
        .subcommand(
            ClapCommand::new("set")
                .about("Set the value of a key")
                .arg(Arg::new("KEY").help("A key").required(true))
                .arg(Arg::new("VALUE").help("A value").required(true)),
        )
        .subcommand(
            ClapCommand::new("get")
                .about("Get the value of a specified key")
                .arg(Arg::new("KEY").help("A key").required(true)),
        )
        .subcommand(
            ClapCommand::new("rm").about("Remove the key-value pair").arg(
                Arg::new("KEY")
                    .help("The key of the key-value pair to be removed")
                    .required(true),
            ),
        )
        .subcommand(ClapCommand::new("keys").about("List every key in the store"))
        .subcommand(
            ClapCommand::new("search-prefix")
                .about("List keys beginning with a prefix")
                .arg(Arg::new("PREFIX").required(true)),
        )
        .subcommand(
            ClapCommand::new("search-value")
                .about("List keys whose value equals VALUE exactly")
                .arg(Arg::new("VALUE").required(true)),
        )
        .subcommand(ClapCommand::new("save").about("Flush the compact tier to disk"))
        .subcommand(ClapCommand::new("stats").about("Print current RAM/disk usage"))
        .get_matches();

    match matches.subcommand() {
        Some(("set", m)) => {
            let mut router = open_router()?;
            let key = m.get_one::<String>("KEY").expect("required").to_string();
            let value = m.get_one::<String>("VALUE").expect("required").to_string();
            router.set(key, value.into_bytes())?;
            router.save()?;
        }
        Some(("get", m)) => {
            let router = open_router()?;
            let key = m.get_one::<String>("KEY").expect("required");
            match router.get(key)? {
                None => println!("Key not found"),
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            }
        }
        Some(("rm", m)) => {
            let mut router = open_router()?;
            let key = m.get_one::<String>("KEY").expect("required");
            if router.get(key)?.is_none() {
                println!("Key not found");
                exit(1);
            }
            router.delete(key)?;
            router.save()?;
        }
        Some(("keys", _)) => {
            let router = open_router()?;
            let mut keys = router.get_all_keys()?;
            keys.sort();
            for key in keys {
                println!("{key}");
            }
        }
        Some(("search-prefix", m)) => {
            let router = open_router()?;
            let prefix = m.get_one::<String>("PREFIX").expect("required");
            let mut keys = router.search_keys_for_prefix(prefix)?;
            keys.sort();
            for key in keys {
                println!("{key}");
            }
        }
        Some(("search-value", m)) => {
            let router = open_router()?;
            let value = m.get_one::<String>("VALUE").expect("required");
            let mut keys = router.search_keys_for_value(value.as_bytes())?;
            keys.sort();
            for key in keys {
                println!("{key}");
            }
        }
        Some(("save", _)) => {
            let router = open_router()?;
            router.save()?;
        }
        Some(("stats", _)) => {
            let router = open_router()?;
            println!("ram_bytes={}", router.ram_bytes());
            println!("disk_bytes={}", router.disk_bytes());
        }
        _ => unreachable!(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_cmd::prelude::*;
    use predicates::prelude::*;
    use predicates::str::{contains, is_empty};
    use std::process::Command;
    use tempfile::TempDir;

    // `tkv` with no args should exit with a non-zero code.
    #[test]
    fn cli_no_args() {
        Command::cargo_bin("tkv").unwrap().assert().failure();
    }

    #[test]
    fn cli_version() {
        Command::cargo_bin("tkv")
            .unwrap()
            .args(["-V"])
            .assert()
            .stdout(contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn cli_get_non_existent_key() {
        let temp_dir = TempDir::new().unwrap();
        Command::cargo_bin("tkv")
            .unwrap()
            .args(["get", "key1"])
            .current_dir(&temp_dir)
            .assert()
            .success()
            .stdout(contains("Key not found"));
    }

    #[test]
    fn cli_rm_non_existent_key() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        Command::cargo_bin("tkv")
            .unwrap()
            .args(["rm", "key1"])
            .current_dir(&temp_dir)
            .assert()
            .failure()
            .stdout(contains("Key not found"));
    }

    #[test]
    fn cli_set() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        Command::cargo_bin("tkv")
            .unwrap()
            .args(["set", "key1", "value1"])
            .current_dir(&temp_dir)
            .assert()
            .success()
            .stdout(is_empty());
    }

    #[test]
    fn cli_set_then_get() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        Command::cargo_bin("tkv")
            .unwrap()
            .args(["set", "key1", "value1"])
            .current_dir(&temp_dir)
            .assert()
            .success();

        Command::cargo_bin("tkv")
            .unwrap()
            .args(["get", "key1"])
            .current_dir(&temp_dir)
            .assert()
            .success()
            .stdout(contains("value1"));
    }

    #[test]
    fn cli_set_then_rm_then_get() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        Command::cargo_bin("tkv")
            .unwrap()
            .args(["set", "key1", "value1"])
            .current_dir(&temp_dir)
            .assert()
            .success();

        Command::cargo_bin("tkv")
            .unwrap()
            .args(["rm", "key1"])
            .current_dir(&temp_dir)
            .assert()
            .success();

        Command::cargo_bin("tkv")
            .unwrap()
            .args(["get", "key1"])
            .current_dir(&temp_dir)
            .assert()
            .success()
            .stdout(contains("Key not found"));
    }

    #[test]
    fn cli_keys_and_search_prefix() {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        for (k, v) in [("fruit/apple", "red"), ("fruit/pear", "green"), ("veg/carrot", "orange")] {
            Command::cargo_bin("tkv")
                .unwrap()
                .args(["set", k, v])
                .current_dir(&temp_dir)
                .assert()
                .success();
        }

        Command::cargo_bin("tkv")
            .unwrap()
            .args(["search-prefix", "fruit/"])
            .current_dir(&temp_dir)
            .assert()
            .success()
            .stdout(contains("fruit/apple").and(contains("fruit/pear")).and(contains("veg/carrot").not()));
    }

    #[test]
    fn cli_invalid_subcommand() {
        Command::cargo_bin("tkv")
            .unwrap()
            .args(["unknown", "subcommand"])
            .assert()
            .failure();
    }
}
