// used for persistence
use rusqlite::{Connection, OptionalExtension, params};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::compose::{WriteChain, WriteMode};
use crate::config::{PersistenceMode, Settings};
use crate::datatype::Id;
use crate::error::{CodingError, Result};
use crate::interface::Record;

/// Version of the schema this build creates and understands.
pub const SCHEMA_VERSION: i64 = 1;

/// Tables of a namespace in creation order. Dropped in reverse.
const TABLES: [&str; 11] = [
    "nodes",
    "links",
    "scales",
    "values",
    "units",
    "metrics",
    "metric_scale",
    "node_metric",
    "events",
    "event_ratings",
    "event_values",
];

fn schema(prefix: &str) -> String {
    format!(
        r#"
        create table if not exists {prefix}_nodes (
            id integer primary key autoincrement,
            label text not null,
            parent integer null references {prefix}_nodes(id) on delete cascade
        );
        create index if not exists {prefix}_nodes_parent on {prefix}_nodes(parent);
        create table if not exists {prefix}_links (
            "from" integer not null references {prefix}_nodes(id) on delete cascade,
            "to" integer not null references {prefix}_nodes(id) on delete cascade,
            primary key ("from", "to")
        );
        create table if not exists {prefix}_scales (
            id integer primary key autoincrement,
            label text not null,
            type text not null check (type in ('interval', 'ordinal', 'nominal'))
        );
        create table if not exists {prefix}_values (
            id integer primary key autoincrement,
            scale integer not null references {prefix}_scales(id) on delete cascade,
            "index" integer not null,
            label text not null,
            unique (scale, "index")
        );
        create table if not exists {prefix}_units (
            scale integer primary key references {prefix}_scales(id) on delete cascade,
            unit text not null,
            "min" real null,
            "max" real null
        );
        create table if not exists {prefix}_metrics (
            id integer primary key autoincrement,
            label text not null
        );
        create table if not exists {prefix}_metric_scale (
            metric integer not null references {prefix}_metrics(id) on delete cascade,
            scale integer not null references {prefix}_scales(id) on delete cascade,
            primary key (metric, scale)
        );
        create table if not exists {prefix}_node_metric (
            node integer not null references {prefix}_nodes(id) on delete cascade,
            metric integer not null references {prefix}_metrics(id) on delete restrict,
            primary key (node, metric)
        );
        create table if not exists {prefix}_events (
            id integer primary key autoincrement,
            type integer null references {prefix}_nodes(id) on delete restrict
        );
        create table if not exists {prefix}_event_ratings (
            event integer not null references {prefix}_events(id) on delete cascade,
            value integer null references {prefix}_values(id) on update cascade on delete restrict
        );
        create table if not exists {prefix}_event_values (
            event integer not null references {prefix}_events(id) on delete cascade,
            scale integer not null references {prefix}_units(scale) on update cascade on delete restrict,
            value real not null
        );
        create view if not exists {prefix}_version as select {SCHEMA_VERSION} as version;
        "#
    )
}

/// Distinguishes in-memory databases opened by one process.
static MEMORY_DATABASES: AtomicU64 = AtomicU64::new(0);

/// The store's handle on SQLite: one long-lived connection for writes and
/// point reads, plus the namespace every table name is built from.
///
/// An in-memory database is opened as a named shared-cache database, so that
/// streaming queries can open connections of their own to it just as they do
/// for a file. It lives as long as the long-lived connection.
pub struct Database {
    settings: Settings,
    location: PathBuf,
    connection: Mutex<Connection>,
}

impl Database {
    /// Opens the database and makes sure the namespace holds a schema this
    /// build understands, creating it when there is none.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let location = match settings.persistence_mode() {
            PersistenceMode::InMemory => {
                let n = MEMORY_DATABASES.fetch_add(1, Ordering::Relaxed);
                PathBuf::from(format!("file:{}_{n}?mode=memory&cache=shared", settings.prefix))
            }
            PersistenceMode::File(path) => path,
        };
        let connection = Connection::open(&location)?;
        configure(&connection, &settings)?;
        debug!(location = %location.display(), "opened database");
        let database = Self {
            settings,
            location,
            connection: Mutex::new(connection),
        };
        let version = database.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(CodingError::SchemaVersion {
                prefix: database.prefix().to_string(),
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version == 0 {
            database.create_schema()?;
        }
        Ok(database)
    }
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    pub fn prefix(&self) -> &str {
        &self.settings.prefix
    }
    /// The namespaced name of a table.
    pub fn table(&self, name: &str) -> String {
        format!("{}_{}", self.settings.prefix, name)
    }
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        Ok(self.connection.lock()?)
    }
    /// The version reported by the namespace's version view, 0 when absent.
    pub fn schema_version(&self) -> Result<i64> {
        let connection = self.lock()?;
        let view = self.table("version");
        let exists = connection
            .query_row(
                "select 1 from sqlite_master where type = 'view' and name = ?1",
                params![view],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(0);
        }
        Ok(connection.query_row(&format!("select version from {view}"), [], |row| row.get(0))?)
    }
    fn create_schema(&self) -> Result<()> {
        let sql = schema(self.prefix());
        self.transaction(|connection| Ok(connection.execute_batch(&sql)?))?;
        info!(prefix = self.prefix(), version = SCHEMA_VERSION, "created schema");
        Ok(())
    }
    /// Drops every table and the version view of the namespace.
    pub fn clean(&self) -> Result<()> {
        let mut sql = format!("drop view if exists {};\n", self.table("version"));
        for table in TABLES.iter().rev() {
            sql.push_str(&format!("drop table if exists {};\n", self.table(table)));
        }
        self.transaction(|connection| Ok(connection.execute_batch(&sql)?))?;
        info!(prefix = self.prefix(), "dropped schema");
        Ok(())
    }
    /// Runs `f` inside a transaction that commits when `f` succeeds and rolls
    /// back otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut connection = self.lock()?;
        let transaction = connection.transaction()?;
        let result = f(&transaction)?;
        transaction.commit()?;
        Ok(result)
    }
    /// Executes a write chain as one transaction and returns the record its
    /// closing select materializes.
    pub fn write<R: Record>(&self, chain: &WriteChain) -> Result<R> {
        debug!(kind = %R::KIND, mode = ?chain.mode(), steps = chain.steps().len(), "write chain");
        self.transaction(|connection| {
            let primary = chain.primary();
            debug!(sql = primary.sql(), "primary");
            let id = match connection.query_row(primary.sql(), primary.named_params(None).as_slice(), |row| {
                row.get::<_, Id>(0)
            }) {
                Ok(id) => id,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(match chain.mode() {
                        WriteMode::Update(id) => CodingError::UnknownId { kind: R::KIND, id },
                        WriteMode::Insert => CodingError::Persistence(format!("insert of {} returned no id", R::KIND)),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            for step in chain.steps() {
                debug!(sql = step.sql(), "step");
                connection.execute(step.sql(), step.named_params(Some(&id)).as_slice())?;
            }
            let select = chain.select();
            let raw = connection.query_row(select.sql(), select.named_params(Some(&id)).as_slice(), R::fetch)?;
            R::scan(&raw)
        })
    }
    /// A new connection to the same database, for a streaming query. Reads
    /// over it never wait on the long-lived connection.
    pub fn read_connection(&self) -> Result<Connection> {
        let connection = Connection::open(&self.location)?;
        configure(&connection, &self.settings)?;
        if self.settings.persistence_mode() == PersistenceMode::InMemory {
            // shared-cache readers would otherwise lock out writers per table
            connection.pragma_update(None, "read_uncommitted", true)?;
        }
        Ok(connection)
    }
}

fn configure(connection: &Connection, settings: &Settings) -> Result<()> {
    connection.execute_batch("pragma foreign_keys = on;")?;
    connection.busy_timeout(settings.busy_timeout())?;
    Ok(())
}
