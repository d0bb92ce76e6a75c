//! Interactive command-line driver for the Lockr store.
//!
//! Opens (or creates) the store under `~/.Lockr` and serves a small REPL:
//! `set`, `get`, `delete`, `list`, `help`, `clear`, and `exit`/`quit`.

use lockr::{LockrConfig, LockrError, LockrStore};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

const USAGE: &str =
    "Commands: set <key> <value> | get <key> | delete <key> | list | help | clear | exit";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(data_dir) = default_data_dir() else {
        eprintln!("Error: could not determine the home directory");
        return ExitCode::FAILURE;
    };

    let store = match LockrStore::open(LockrConfig::new(data_dir)).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = repl(&store).await;
    if let Err(e) = store.close().await {
        eprintln!("Error closing store: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// The data directory lives at `<home>/.Lockr`.
fn default_data_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".Lockr"))
}

async fn repl(store: &LockrStore) -> Result<(), LockrError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("Lockr> ");
        std::io::stdout().flush().ok();

        let Ok(Some(line)) = lines.next_line().await else {
            break; // EOF
        };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let mut parts = input.splitn(3, ' ');
        let command = parts.next().unwrap_or_default();
        let key = parts.next();
        let value = parts.next();

        match command {
            "help" => println!("{}", USAGE),
            "clear" => print!("\x1b[2J\x1b[H"),
            "list" => match store.list().await {
                Ok(entries) if entries.is_empty() => println!("No entries found"),
                Ok(entries) => {
                    for (k, v) in entries {
                        println!("{}: {}", k, v);
                    }
                }
                Err(e) => println!("Error listing entries: {}", e),
            },
            "set" => match (key, value) {
                (Some(key), Some(value)) => match store.set(key, value).await {
                    Ok(()) => println!("Set {} to {}", key, value),
                    Err(e) => println!("Error setting value: {}", e),
                },
                _ => println!("Invalid 'set' command. Use 'set <key> <value>'."),
            },
            "get" => match key {
                Some(key) => match store.get(key).await {
                    Ok(Some(value)) => println!("{}", value),
                    Ok(None) => println!("Key {} not found", key),
                    Err(e) => println!("Error getting value: {}", e),
                },
                None => println!("Invalid 'get' command. Use 'get <key>'."),
            },
            "delete" => match key {
                Some(key) => match store.delete(key).await {
                    Ok(()) => println!("Deleted {}", key),
                    Err(LockrError::KeyNotFound) => println!("Key {} not found", key),
                    Err(e) => println!("Error deleting key: {}", e),
                },
                None => println!("Invalid 'delete' command. Use 'delete <key>'."),
            },
            _ => println!("Invalid command. {}", USAGE),
        }
    }

    Ok(())
}
