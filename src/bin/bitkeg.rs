//! Command-line front end over the `bitkeg` store: a thin `clap`
//! subcommand dispatcher, not the store's core API. Logging is initialized
//! here via `simplelog`, matching the level the teacher's library code logs
//! at through the `log` facade.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use bitkeg::{Db, Error, Options};

#[derive(Parser)]
#[command(name = "bitkeg", about = "An embeddable, log-structured key-value store")]
struct Cli {
    /// Store directory. Defaults to `~/.bitkeg`.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Active-file rotation threshold in bytes. 0 or unset uses the
    /// built-in default.
    #[arg(long, global = true, default_value_t = 0)]
    segment_size: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a value for a key.
    Set { key: String, value: String },
    /// Fetch the value stored for a key.
    Get { key: String },
    /// Remove a key.
    Delete { key: String },
    /// Compact sealed segments, reclaiming space from overwritten and
    /// deleted keys.
    Merge,
}

fn default_dir() -> PathBuf {
    let mut dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push(".bitkeg");
    dir
}

fn main() -> ExitCode {
    TermLogger::init(LevelFilter::Info, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
        .expect("failed to initialize logger");

    let cli = Cli::parse();
    let dir = cli.dir.unwrap_or_else(default_dir);
    let options = Options::new(dir).with_segment_size(cli.segment_size);

    let db = match Db::open(options) {
        Ok(db) => db,
        Err(e) => {
            log::error!("failed to open store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Set { key, value } => db.set(key.as_bytes(), value.as_bytes()),
        Command::Get { key } => match db.get(key.as_bytes()) {
            Ok(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Delete { key } => db.delete(key.as_bytes()),
        Command::Merge => db.merge(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::KeyNotFound) => {
            eprintln!("key not found");
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
