use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use shelldb::config::resolve_settings;
use shelldb::{Connection, Driver, MarkerMode, Row, ShellResult};
use tokio_util::sync::CancellationToken;

/// Run SQL against a database through the sqlite3 shell
#[derive(Parser)]
#[command(name = "shelldb")]
#[command(version)]
#[command(about = "Run SQL against a database through the sqlite3 shell")]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/shelldb/shelldb.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the fixed end-of-statement marker instead of a unique one per
    /// request
    #[arg(long)]
    inert_marker: bool,

    /// Give up on a statement after this many milliseconds
    #[arg(long, value_name = "N")]
    timeout_ms: Option<u64>,

    /// Database file passed to the shell
    database: String,

    /// Statements to run; read one per line from stdin when omitted
    sql: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut settings = match resolve_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if cli.inert_marker {
        settings.marker = MarkerMode::Inert;
    }
    if cli.timeout_ms.is_some() {
        settings.statement_timeout_ms = cli.timeout_ms;
    }

    let statements = if cli.sql.is_empty() {
        match read_stdin_statements() {
            Ok(statements) => statements,
            Err(e) => {
                eprintln!("Error: failed to read stdin: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        cli.sql
    };

    let driver = Driver::new(settings);
    let cancel = CancellationToken::new();
    let conn = match driver.open(&cancel, &cli.database).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut status = ExitCode::SUCCESS;
    for sql in &statements {
        if let Err(e) = run(&conn, &cancel, sql).await {
            eprintln!("Error: {}", e);
            status = ExitCode::FAILURE;
            if e.is_connection_lost() {
                break;
            }
        }
    }
    if let Err(e) = conn.close().await {
        eprintln!("Error: {}", e);
        status = ExitCode::FAILURE;
    }
    status
}

fn read_stdin_statements() -> std::io::Result<Vec<String>> {
    let mut statements = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if !line.trim().is_empty() {
            statements.push(line);
        }
    }
    Ok(statements)
}

/// Run one statement and print its result set, if any.
async fn run(conn: &Connection, cancel: &CancellationToken, sql: &str) -> ShellResult<()> {
    let mut rows = conn.query(cancel, sql, &[]).await?;
    if !rows.columns().is_empty() {
        println!("{}", rows.columns().names().join("\t"));
    }
    while let Some(row) = rows.next().await? {
        println!("{}", format_row(&row));
    }
    Ok(())
}

fn format_row(row: &Row) -> String {
    row.values()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\t")
}
