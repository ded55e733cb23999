//! Command-line access to a repokit store.
//!
//! Provides the `repokit` binary for inspecting and editing a file or SQLite
//! repository of JSON records keyed by string indices. Every mutating
//! subcommand runs in a single unit of work and commits once.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use repokit_storage::{
    FileRepository, Repository, RepositoryError, SqliteOptions, SqliteRepository,
    DEFAULT_COLLECTION,
};

/// Environment variable consulted when `--path` is not given.
const PATH_ENV: &str = "REPOKIT_PATH";

/// Inspect and edit repokit stores.
#[derive(Parser, Debug)]
#[command(name = "repokit", about = "Inspect and edit repokit stores")]
struct Cli {
    /// Storage backend.
    #[arg(short, long, value_enum, default_value_t = Backend::File)]
    backend: Backend,

    /// Store location (default: $REPOKIT_PATH, then repokit.json / repokit.db).
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Collection name (SQLite only).
    #[arg(short, long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Log storage activity to stderr.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    File,
    Sqlite,
}

impl Backend {
    fn default_path(self) -> &'static str {
        match self {
            Backend::File => "repokit.json",
            Backend::Sqlite => "repokit.db",
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every entry, one `index<TAB>json` line each.
    List,
    /// Print one record.
    Get { index: String },
    /// Store a new record under a fresh UUID and print the index.
    Add { json: String },
    /// Replace the record stored under an existing index.
    Set { index: String, json: String },
    /// Remove the record stored under an index.
    Delete { index: String },
    /// Print the number of entries.
    Count,
    /// List the collections present in a SQLite store.
    Collections,
}

/// Failure of a subcommand, carrying its exit code.
#[derive(Debug)]
enum CliError {
    Invalid(String),
    Storage(RepositoryError),
}

impl CliError {
    /// 1 = index not found, 2 = invalid input, 3 = storage failure.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Storage(e) if e.is_not_found() => 1,
            CliError::Invalid(_) => 2,
            CliError::Storage(_) => 3,
        }
    }
}

impl From<RepositoryError> for CliError {
    fn from(err: RepositoryError) -> Self {
        CliError::Storage(err)
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Invalid(msg) => write!(f, "{}", msg),
            CliError::Storage(e) => write!(f, "{}", e),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match execute(&cli) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves the store location: flag, then environment, then backend default.
fn resolve_path(cli: &Cli, env_path: Option<String>) -> PathBuf {
    cli.path
        .clone()
        .or_else(|| env_path.filter(|p| !p.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(cli.backend.default_path()))
}

fn new_index() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Runs the selected subcommand and returns the lines to print.
fn execute(cli: &Cli) -> Result<Vec<String>, CliError> {
    let path = resolve_path(cli, std::env::var(PATH_ENV).ok());
    tracing::debug!("Using {:?} store at {}", cli.backend, path.display());

    match cli.backend {
        Backend::File => {
            if matches!(cli.command, Commands::Collections) {
                return Err(CliError::Invalid(
                    "collections requires --backend sqlite".to_string(),
                ));
            }
            let repo: FileRepository<String, Value> = FileRepository::new(&path, new_index);
            run_command(&repo, &cli.command)
        }
        Backend::Sqlite => {
            let options = SqliteOptions::default().with_collection(cli.collection.clone());
            let repo: SqliteRepository<String, Value> =
                SqliteRepository::with_options(&path, new_index, options)?;
            if matches!(cli.command, Commands::Collections) {
                return Ok(repo.collections()?);
            }
            run_command(&repo, &cli.command)
        }
    }
}

/// Executes a backend-independent subcommand against `repo`.
fn run_command<Repo>(repo: &Repo, command: &Commands) -> Result<Vec<String>, CliError>
where
    Repo: Repository<String, Value>,
{
    match command {
        Commands::List => {
            let mut lines = Vec::new();
            for entry in repo.entries()? {
                let (index, record) = entry?;
                lines.push(format!("{}\t{}", index, record));
            }
            Ok(lines)
        }
        Commands::Get { index } => {
            let record = repo.get(index)?;
            Ok(vec![pretty(&record)])
        }
        Commands::Add { json } => {
            let record = parse_record(json)?;
            let index = repo.start_work(|work| -> Result<String, CliError> {
                let index = work.add(&record)?;
                work.commit()?;
                Ok(index)
            })?;
            Ok(vec![index])
        }
        Commands::Set { index, json } => {
            let record = parse_record(json)?;
            repo.start_work(|work| -> Result<(), CliError> {
                work.set(index, &record)?;
                work.commit()?;
                Ok(())
            })?;
            Ok(Vec::new())
        }
        Commands::Delete { index } => {
            repo.start_work(|work| -> Result<(), CliError> {
                work.delete(index)?;
                work.commit()?;
                Ok(())
            })?;
            Ok(Vec::new())
        }
        Commands::Count => Ok(vec![repo.len()?.to_string()]),
        Commands::Collections => Err(CliError::Invalid(
            "collections requires --backend sqlite".to_string(),
        )),
    }
}

fn parse_record(json: &str) -> Result<Value, CliError> {
    serde_json::from_str(json)
        .map_err(|e| CliError::Invalid(format!("invalid JSON record '{}': {}", json, e)))
}

fn pretty(record: &Value) -> String {
    serde_json::to_string_pretty(record).unwrap_or_else(|_| record.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("repokit").chain(args.iter().copied())).unwrap()
    }

    fn run(dir: &tempfile::TempDir, backend: &str, args: &[&str]) -> Result<Vec<String>, CliError> {
        let file = if backend == "sqlite" { "store.db" } else { "store.json" };
        let path = dir.path().join(file);
        let path = path.to_str().unwrap();
        let mut full = vec!["--backend", backend, "--path", path];
        full.extend_from_slice(args);
        execute(&parse(&full))
    }

    #[test]
    fn test_parse_defaults() {
        let cli = parse(&["count"]);
        assert_eq!(cli.backend, Backend::File);
        assert_eq!(cli.collection, "records");
        assert!(cli.path.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        let err = Cli::try_parse_from(["repokit", "--backend", "postgres", "count"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_resolve_path_precedence() {
        let explicit = parse(&["--path", "explicit.json", "count"]);
        assert_eq!(
            resolve_path(&explicit, Some("env.json".to_string())),
            PathBuf::from("explicit.json")
        );

        let from_env = parse(&["count"]);
        assert_eq!(
            resolve_path(&from_env, Some("env.json".to_string())),
            PathBuf::from("env.json")
        );
        assert_eq!(resolve_path(&from_env, None), PathBuf::from("repokit.json"));

        let sqlite = parse(&["--backend", "sqlite", "count"]);
        assert_eq!(resolve_path(&sqlite, Some(String::new())), PathBuf::from("repokit.db"));
    }

    #[test]
    fn test_exit_codes() {
        let missing = CliError::Storage(RepositoryError::KeyNotFound {
            index: "\"abc\"".to_string(),
        });
        assert_eq!(missing.exit_code(), 1);
        assert_eq!(CliError::Invalid("bad".to_string()).exit_code(), 2);
        let corrupt = CliError::Storage(RepositoryError::Migration("boom".to_string()));
        assert_eq!(corrupt.exit_code(), 3);
    }

    #[test]
    fn test_file_add_get_set_delete() {
        let dir = tempfile::tempdir().unwrap();

        let added = run(&dir, "file", &["add", r#"{"name":"widget"}"#]).unwrap();
        assert_eq!(added.len(), 1);
        let index = added[0].clone();
        assert!(uuid::Uuid::parse_str(&index).is_ok());

        let got = run(&dir, "file", &["get", &index]).unwrap();
        assert_eq!(got, vec!["{\n  \"name\": \"widget\"\n}".to_string()]);

        run(&dir, "file", &["set", &index, r#"{"name":"gadget"}"#]).unwrap();
        let listed = run(&dir, "file", &["list"]).unwrap();
        assert_eq!(listed, vec![format!("{}\t{}", index, r#"{"name":"gadget"}"#)]);

        run(&dir, "file", &["delete", &index]).unwrap();
        assert_eq!(run(&dir, "file", &["count"]).unwrap(), vec!["0".to_string()]);
    }

    #[test]
    fn test_invalid_json_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir, "file", &["add", "{not json"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!dir.path().join("store.json").exists());
    }

    #[test]
    fn test_missing_index_exits_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let get = run(&dir, "file", &["get", "nope"]).unwrap_err();
        assert_eq!(get.exit_code(), 1);
        let set = run(&dir, "sqlite", &["set", "nope", "1"]).unwrap_err();
        assert_eq!(set.exit_code(), 1);
    }

    #[test]
    fn test_sqlite_collections() {
        let dir = tempfile::tempdir().unwrap();
        run(&dir, "sqlite", &["--collection", "parts", "add", "1"]).unwrap();
        run(&dir, "sqlite", &["--collection", "tools", "add", "2"]).unwrap();

        let names = run(&dir, "sqlite", &["collections"]).unwrap();
        assert_eq!(names, vec!["parts".to_string(), "tools".to_string()]);

        let count = run(&dir, "sqlite", &["--collection", "parts", "count"]).unwrap();
        assert_eq!(count, vec!["1".to_string()]);

        let err = run(&dir, "file", &["collections"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
