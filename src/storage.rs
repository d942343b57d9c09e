//! Roster and crossing persistence.
//!
//! The schema keeps the facility's existing table layout:
//!
//! - `Employees(employee_id, name, department, car_plate)`
//! - `Cars(id, plate, direction, time, employee_id)`
//!
//! `Cars.employee_id` is resolved at write time; the crossings view left-joins
//! it back to `Employees`, so crossings by unknown vehicles still show up.
//!
//! Each camera session opens its own store through a `StoreOpener`; no
//! connection is shared between sessions.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{
    open_db_connection, shared_memory_uri, CrossingEvent, CrossingRow, Direction, Employee,
    NewEmployee,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub trait RosterStore: Send {
    /// Employee id registered for `plate`, if any. Matching ignores ASCII case.
    fn find_employee_by_plate(&mut self, plate: &str) -> Result<Option<i64>>;

    /// Persist one crossing. Returns the new row id.
    fn record_crossing(&mut self, ev: &CrossingEvent) -> Result<i64>;

    /// All crossings, oldest first, with employee fields where the link resolves.
    fn list_crossings(&mut self) -> Result<Vec<CrossingRow>>;

    fn add_employee(&mut self, employee: &NewEmployee) -> Result<i64>;

    fn list_employees(&mut self) -> Result<Vec<Employee>>;
}

/// Opens a fresh store handle for one session.
pub trait StoreOpener: Send + Sync {
    fn describe(&self) -> String;

    fn open(&self) -> Result<Box<dyn RosterStore>>;
}

// -------------------- SQLite --------------------

pub struct SqliteRosterStore {
    conn: Connection,
}

impl SqliteRosterStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("failed to open roster store {}", db_path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS Employees (
              employee_id INTEGER PRIMARY KEY AUTOINCREMENT,
              name VARCHAR(25) NOT NULL,
              department VARCHAR(50) NOT NULL,
              car_plate VARCHAR(9) NOT NULL CHECK (length(car_plate) <= 9)
            );

            CREATE TABLE IF NOT EXISTS Cars (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plate VARCHAR(9) NOT NULL CHECK (length(plate) <= 9),
              direction VARCHAR(25) NOT NULL
                CHECK (direction IN ('entry', 'exit', 'unspecified')),
              time INTEGER NOT NULL,
              employee_id INTEGER REFERENCES Employees(employee_id)
            );

            CREATE INDEX IF NOT EXISTS idx_employees_plate ON Employees(car_plate COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_cars_time ON Cars(time);
            "#,
        )?;
        Ok(())
    }
}

impl RosterStore for SqliteRosterStore {
    fn find_employee_by_plate(&mut self, plate: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                r#"
                SELECT employee_id FROM Employees
                WHERE car_plate = ?1 COLLATE NOCASE
                ORDER BY employee_id ASC LIMIT 1
                "#,
                params![plate],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn record_crossing(&mut self, ev: &CrossingEvent) -> Result<i64> {
        ev.validate()?;
        let time = i64::try_from(ev.timestamp_s)
            .map_err(|_| anyhow!("crossing timestamp exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO Cars(plate, direction, time, employee_id)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![ev.plate, ev.direction.as_str(), time, ev.employee_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_crossings(&mut self) -> Result<Vec<CrossingRow>> {
        let raw = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT c.plate, e.name, e.department, c.direction, c.time
                FROM Cars c
                LEFT OUTER JOIN Employees e ON c.employee_id = e.employee_id
                ORDER BY c.id ASC
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        raw.into_iter()
            .map(|(plate, name, department, direction, time)| {
                Ok(CrossingRow {
                    plate,
                    name,
                    department,
                    direction: direction.parse::<Direction>()?,
                    timestamp_s: u64::try_from(time)
                        .map_err(|_| anyhow!("corrupt crossing: negative time"))?,
                })
            })
            .collect()
    }

    fn add_employee(&mut self, employee: &NewEmployee) -> Result<i64> {
        employee.validate()?;
        self.conn.execute(
            "INSERT INTO Employees(name, department, car_plate) VALUES (?1, ?2, ?3)",
            params![employee.name, employee.department, employee.plate],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_employees(&mut self) -> Result<Vec<Employee>> {
        let mut stmt = self.conn.prepare(
            "SELECT employee_id, name, department, car_plate FROM Employees ORDER BY employee_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Employee {
                id: row.get(0)?,
                name: row.get(1)?,
                department: row.get(2)?,
                plate: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Opens one SQLite connection per session against the same database.
///
/// `:memory:` is turned into a shared-cache URI so every session sees the same
/// in-memory database; the opener keeps one anchor connection alive for it.
pub struct SqliteOpener {
    db_path: String,
    _anchor: Option<Mutex<Connection>>,
}

impl SqliteOpener {
    pub fn new(db_path: &str) -> Result<Self> {
        if db_path == ":memory:" {
            let uri = shared_memory_uri();
            let anchor = open_db_connection(&uri)?;
            return Ok(Self {
                db_path: uri,
                _anchor: Some(Mutex::new(anchor)),
            });
        }
        Ok(Self {
            db_path: db_path.to_string(),
            _anchor: None,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }
}

impl StoreOpener for SqliteOpener {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path)
    }

    fn open(&self) -> Result<Box<dyn RosterStore>> {
        Ok(Box::new(SqliteRosterStore::open(&self.db_path)?))
    }
}

// -------------------- In-memory --------------------

#[derive(Debug, Default)]
struct InMemoryState {
    employees: Vec<Employee>,
    crossings: Vec<CrossingEvent>,
    fail_writes: bool,
    fail_reads: bool,
}

/// Process-local store. Clones share the same backing state, so one clone can
/// be handed to each session while tests inspect another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRosterStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryRosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory roster lock poisoned"))
    }

    /// Snapshot of recorded crossings, oldest first.
    pub fn crossings(&self) -> Result<Vec<CrossingEvent>> {
        Ok(self.lock()?.crossings.clone())
    }

    /// Make every subsequent write fail (simulates an unreachable store).
    pub fn set_fail_writes(&self, fail: bool) -> Result<()> {
        self.lock()?.fail_writes = fail;
        Ok(())
    }

    /// Make every subsequent lookup fail.
    pub fn set_fail_reads(&self, fail: bool) -> Result<()> {
        self.lock()?.fail_reads = fail;
        Ok(())
    }
}

impl RosterStore for InMemoryRosterStore {
    fn find_employee_by_plate(&mut self, plate: &str) -> Result<Option<i64>> {
        let state = self.lock()?;
        if state.fail_reads {
            return Err(anyhow!("roster store unreachable"));
        }
        Ok(state
            .employees
            .iter()
            .find(|e| e.plate.eq_ignore_ascii_case(plate))
            .map(|e| e.id))
    }

    fn record_crossing(&mut self, ev: &CrossingEvent) -> Result<i64> {
        ev.validate()?;
        let mut state = self.lock()?;
        if state.fail_writes {
            return Err(anyhow!("roster store write failed"));
        }
        state.crossings.push(ev.clone());
        Ok(state.crossings.len() as i64)
    }

    fn list_crossings(&mut self) -> Result<Vec<CrossingRow>> {
        let state = self.lock()?;
        Ok(state
            .crossings
            .iter()
            .map(|ev| {
                let employee = ev
                    .employee_id
                    .and_then(|id| state.employees.iter().find(|e| e.id == id));
                CrossingRow {
                    plate: ev.plate.clone(),
                    name: employee.map(|e| e.name.clone()),
                    department: employee.map(|e| e.department.clone()),
                    direction: ev.direction,
                    timestamp_s: ev.timestamp_s,
                }
            })
            .collect())
    }

    fn add_employee(&mut self, employee: &NewEmployee) -> Result<i64> {
        employee.validate()?;
        let mut state = self.lock()?;
        if state.fail_writes {
            return Err(anyhow!("roster store write failed"));
        }
        let id = state.employees.len() as i64 + 1;
        state.employees.push(Employee {
            id,
            name: employee.name.clone(),
            department: employee.department.clone(),
            plate: employee.plate.clone(),
        });
        Ok(id)
    }

    fn list_employees(&mut self) -> Result<Vec<Employee>> {
        Ok(self.lock()?.employees.clone())
    }
}

impl StoreOpener for InMemoryRosterStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn open(&self) -> Result<Box<dyn RosterStore>> {
        Ok(Box::new(self.clone()))
    }
}
