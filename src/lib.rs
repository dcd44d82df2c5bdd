//! A database client that drives the `sqlite3` shell over pipes.
//!
//! Each [`Connection`] owns one shell started as
//! `sqlite3 -quote -header <database>`. Statements are written to its
//! stdin followed by a marker command, and the merged stdout/stderr is
//! split at the marker and decoded into typed rows.
//!
//! ```no_run
//! # async fn demo() -> shelldb::ShellResult<()> {
//! use shelldb::{Driver, ShellSettings, Value};
//! use tokio_util::sync::CancellationToken;
//!
//! let driver = Driver::new(ShellSettings::default());
//! let cancel = CancellationToken::new();
//! let conn = driver.open(&cancel, "app.db").await?;
//! conn.execute(&cancel, "create table if not exists t(x)", &[]).await?;
//! conn.execute(&cancel, "insert into t values(?)", &[Value::from("hi")]).await?;
//! let rows = conn.query(&cancel, "select x from t", &[]).await?.collect_all().await?;
//! assert_eq!(rows[0].get_named("x"), Some(&Value::from("hi")));
//! conn.close().await
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub(crate) mod coordinator;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod row;
pub mod rows;
pub(crate) mod shell;
pub mod sql;
pub mod value;

pub use config::{ConfigError, ShellSettings};
pub use connection::{Connection, PreparedStatement};
pub use connector::Connector;
pub use driver::Driver;
pub use error::{DecodeError, FailureKind, ShellError, ShellResult};
pub use protocol::MarkerMode;
pub use row::{Columns, Row};
pub use rows::Rows;
pub use value::Value;
