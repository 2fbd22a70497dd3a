// store.rs -- SQLite persistence (spec.md ss6 On-disk state).
// Converted from: myq2-original has no analog (Quake 2 keeps no server-side
// player/ban database); grounded on the broader pack's rusqlite usage
// (see DESIGN.md) for schema-versioned bundled-SQLite access, applied to
// the table set spec.md ss6 enumerates.

use rusqlite::{params, Connection, OptionalExtension};

pub const SCHEMA_NUMBER: u32 = 3;

pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct BanRecord {
    pub name: String,
    pub server: String,
    pub authserver: Option<String>,
    pub ip: Option<String>,
    pub date: String,
    pub expiry: Option<String>,
    pub permanent: bool,
    pub moderator: String,
    pub reason: Option<String>,
}

impl Store {
    /// Open (creating if absent) and migrate the database at `path`.
    /// Per spec.md ss6: `schema_number = 0` means uninitialized and is
    /// created fresh; `schema_number` below [`SCHEMA_NUMBER`] is a fatal
    /// "incompatible database format" error.
    pub fn open(path: &str) -> Result<Self, crate::error::StartupError> {
        let conn = Connection::open(path)?;
        let mut store = Store { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, crate::error::StartupError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Store { conn };
        store.migrate()?;
        Ok(store)
    }

    fn current_schema_number(&self) -> Result<u32, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT value FROM config WHERE name = 'schema_number'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|v| v.parse().unwrap_or(0))
            .map(Ok)
            .unwrap_or(Ok(0))
    }

    fn migrate(&mut self) -> Result<(), crate::error::StartupError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (name TEXT PRIMARY KEY, value TEXT);",
        )?;

        let found = self.current_schema_number()?;
        if found == 0 {
            self.create_schema()?;
            self.conn.execute(
                "INSERT OR REPLACE INTO config (name, value) VALUES ('schema_number', ?1)",
                params![SCHEMA_NUMBER.to_string()],
            )?;
            return Ok(());
        }
        if found < SCHEMA_NUMBER {
            return Err(crate::error::StartupError::IncompatibleSchema { found, required: SCHEMA_NUMBER });
        }
        Ok(())
    }

    fn create_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS moderators (
                name TEXT NOT NULL,
                server TEXT NOT NULL,
                PRIMARY KEY (name, server)
            );
            CREATE TABLE IF NOT EXISTS bans (
                name TEXT NOT NULL,
                server TEXT NOT NULL,
                authserver TEXT,
                ip TEXT,
                date TEXT NOT NULL,
                expiry TEXT,
                permanent INTEGER NOT NULL DEFAULT 0,
                moderator TEXT NOT NULL,
                reason TEXT
            );
            CREATE TABLE IF NOT EXISTS players (
                name TEXT NOT NULL,
                server TEXT NOT NULL,
                initialip TEXT,
                latestip TEXT,
                latestgame INTEGER,
                games INTEGER NOT NULL DEFAULT 0,
                dotas INTEGER NOT NULL DEFAULT 0,
                loadingtime INTEGER NOT NULL DEFAULT 0,
                duration INTEGER NOT NULL DEFAULT 0,
                left INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                kills INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (name, server)
            );
            CREATE TABLE IF NOT EXISTS iptocountry (
                ip1 INTEGER NOT NULL,
                ip2 INTEGER NOT NULL,
                country TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_iptocountry_range ON iptocountry (ip1, ip2);
            CREATE TABLE IF NOT EXISTS aliases (
                alias TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS games (
                id INTEGER PRIMARY KEY,
                creator TEXT,
                mapcpath TEXT,
                mapspath TEXT,
                crc32 INTEGER,
                playernames TEXT,
                playerids TEXT,
                saveids TEXT
            );
            ",
        )
    }

    pub fn resolve_alias(&self, alias: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row("SELECT value FROM aliases WHERE alias = ?1", params![alias], |row| row.get(0))
            .optional()
    }

    pub fn set_alias(&self, alias: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO aliases (alias, value) VALUES (?1, ?2) ON CONFLICT(alias) DO UPDATE SET value = excluded.value",
            params![alias, value],
        )?;
        Ok(())
    }

    /// Realm-scoped ban lookup (spec.md ss10 supplemented feature).
    pub fn is_banned(&self, name: &str, server: &str) -> Result<Option<BanRecord>, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT name, server, authserver, ip, date, expiry, permanent, moderator, reason
                 FROM bans WHERE name = ?1 AND server = ?2
                 ORDER BY date DESC LIMIT 1",
                params![name, server],
                |row| {
                    Ok(BanRecord {
                        name: row.get(0)?,
                        server: row.get(1)?,
                        authserver: row.get(2)?,
                        ip: row.get(3)?,
                        date: row.get(4)?,
                        expiry: row.get(5)?,
                        permanent: row.get::<_, i64>(6)? != 0,
                        moderator: row.get(7)?,
                        reason: row.get(8)?,
                    })
                },
            )
            .optional()
    }

    pub fn is_moderator(&self, name: &str, server: &str) -> Result<bool, rusqlite::Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM moderators WHERE name = ?1 AND server = ?2",
            params![name, server],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn record_game(&self, creator: &str, mapcpath: &str, crc32: u32, playernames: &str) -> Result<i64, rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO games (creator, mapcpath, crc32, playernames) VALUES (?1, ?2, ?3, ?4)",
            params![creator, mapcpath, crc32, playernames],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Batch load a geo-IP CSV (~4 MB, spec.md ss5) inside a single
    /// transaction.
    pub fn load_iptocountry_csv(&mut self, rows: impl Iterator<Item = (u32, u32, String)>) -> Result<usize, rusqlite::Error> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM iptocountry", [])?;
        let mut count = 0usize;
        {
            let mut stmt = tx.prepare("INSERT INTO iptocountry (ip1, ip2, country) VALUES (?1, ?2, ?3)")?;
            for (ip1, ip2, country) in rows {
                stmt.execute(params![ip1, ip2, country])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_initializes_schema_number() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.current_schema_number().unwrap(), SCHEMA_NUMBER);
    }

    #[test]
    fn ban_lookup_is_realm_scoped() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO bans (name, server, date, permanent, moderator) VALUES ('Bob', 'realm1', '2026-01-01', 1, 'Alice')",
                [],
            )
            .unwrap();
        assert!(store.is_banned("Bob", "realm1").unwrap().is_some());
        assert!(store.is_banned("Bob", "realm2").unwrap().is_none());
    }

    #[test]
    fn alias_resolves_after_set() {
        let store = Store::open_in_memory().unwrap();
        store.set_alias("local:melee.w3x", "Maps/melee.w3x").unwrap();
        assert_eq!(store.resolve_alias("local:melee.w3x").unwrap().as_deref(), Some("Maps/melee.w3x"));
        assert_eq!(store.resolve_alias("unknown").unwrap(), None);
    }

    #[test]
    fn iptocountry_bulk_load_replaces_existing_rows() {
        let mut store = Store::open_in_memory().unwrap();
        let rows = vec![(1u32, 100u32, "US".to_string()), (101, 200, "CA".to_string())];
        let inserted = store.load_iptocountry_csv(rows.into_iter()).unwrap();
        assert_eq!(inserted, 2);
    }
}
