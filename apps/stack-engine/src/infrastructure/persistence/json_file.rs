//! JSON file stores.
//!
//! The files are the only state: every operation re-reads its file, so
//! worker processes sharing a data directory see each other's orders and
//! locks. A sidecar `.lock` file carries an advisory lock, shared for reads
//! and exclusive for read-modify-write. Writes go to a synced temporary file
//! that is renamed over the old one, so a crash leaves either the old or the
//! new state on disk.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::domain::order_stack::{
    NewOrder, Order, OrderFilter, OrderStore, OrderUpdate, RemovalCheck, StackError, StackTable,
    Tier,
};
use crate::domain::positions::{
    Booking, BreakBook, BreakStore, LedgerBook, PositionBreak, PositionLedger,
};
use crate::domain::shared::{ContractId, InstrumentId, OrderId, StoreError};

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Load `path`, or the default value if the file does not exist yet.
fn load<V: DeserializeOwned + Default>(path: &Path) -> Result<V, StoreError> {
    if !path.exists() {
        return Ok(V::default());
    }
    let contents = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Replace `path` with `value` via a synced temporary file and a rename.
fn write_atomically<V: Serialize>(path: &Path, value: &V) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
    file.write_all(&json).map_err(|e| io_error(&tmp, e))?;
    file.sync_all().map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

// ============================================================================
// Locked file
// ============================================================================

/// A JSON document guarded by an advisory lock on a sidecar file.
///
/// The lock is taken on the sidecar because the document itself is replaced
/// by rename on every write.
#[derive(Debug)]
struct LockedJson {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LockedJson {
    fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        }
        let lock_path = path.with_extension("lock");
        Ok(Self { path, lock_path })
    }

    fn lock_file(&self) -> Result<fd_lock::RwLock<File>, StoreError> {
        let file = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| io_error(&self.lock_path, e))?;
        Ok(fd_lock::RwLock::new(file))
    }

    /// Current document, read under a shared lock.
    fn read<V: DeserializeOwned + Default>(&self) -> Result<V, StoreError> {
        let lock = self.lock_file()?;
        let _shared = lock.read().map_err(|e| io_error(&self.lock_path, e))?;
        load(&self.path)
    }

    /// Re-read the document under an exclusive lock, apply `f`, and write the
    /// result if `f` succeeds. A failed `f` leaves the file untouched.
    fn modify<V, R, E>(&self, f: impl FnOnce(&mut V) -> Result<R, E>) -> Result<R, E>
    where
        V: Serialize + DeserializeOwned + Default,
        E: From<StoreError>,
    {
        let mut lock = self.lock_file()?;
        let _exclusive = lock.write().map_err(|e| io_error(&self.lock_path, e))?;
        let mut value: V = load(&self.path)?;
        let result = f(&mut value)?;
        write_atomically(&self.path, &value)?;
        Ok(result)
    }
}

// ============================================================================
// Order store
// ============================================================================

/// File-backed implementation of [`OrderStore`].
#[derive(Debug)]
pub struct JsonFileOrderStore<T: Tier> {
    file: LockedJson,
    _tier: std::marker::PhantomData<T>,
}

impl<T: Tier> JsonFileOrderStore<T> {
    /// Open the store at `path`.
    ///
    /// # Errors
    ///
    /// The directory cannot be created, or an existing file cannot be read
    /// or decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            file: LockedJson::open(path.into())?,
            _tier: std::marker::PhantomData,
        };
        let table = store.table()?;
        info!(
            tier = T::NAME,
            path = %store.path().display(),
            orders = table.len(),
            "Order store opened"
        );
        Ok(store)
    }

    /// Open the store for this tier inside `dir`.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_in(dir: &Path) -> Result<Self, StoreError> {
        Self::open(dir.join(format!("{}_orders.json", T::NAME)))
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    fn table(&self) -> Result<StackTable<T>, StoreError> {
        self.file.read()
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut StackTable<T>) -> Result<R, StackError>,
    ) -> Result<R, StackError> {
        self.file.modify(|table: &mut StackTable<T>| -> Result<R, StackError> {
            let result = f(table)?;
            debug!(tier = T::NAME, orders = table.len(), "Order store persisted");
            Ok(result)
        })
    }
}

impl<T: Tier> OrderStore<T> for JsonFileOrderStore<T> {
    fn insert(
        &self,
        orders: Vec<NewOrder<T>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderId>, StackError> {
        self.mutate(|table| table.insert(orders, now))
    }

    fn get(&self, id: OrderId) -> Result<Option<Order<T>>, StackError> {
        Ok(self.table()?.get(id).cloned())
    }

    fn update(&self, id: OrderId, f: OrderUpdate<'_, T>) -> Result<Order<T>, StackError> {
        self.mutate(|table| table.update(id, f))
    }

    fn remove(&self, id: OrderId, check: RemovalCheck<'_, T>) -> Result<Order<T>, StackError> {
        self.mutate(|table| table.remove(id, check))
    }

    fn next_unprocessed_after(
        &self,
        cursor: Option<OrderId>,
    ) -> Result<Option<OrderId>, StackError> {
        Ok(self.table()?.next_unprocessed_after(cursor))
    }

    fn scan(&self, filter: &OrderFilter) -> Result<Vec<Order<T>>, StackError> {
        Ok(self.table()?.scan(filter))
    }
}

// ============================================================================
// Position ledger
// ============================================================================

/// File-backed implementation of [`PositionLedger`].
#[derive(Debug)]
pub struct JsonFilePositionLedger {
    file: LockedJson,
}

impl JsonFilePositionLedger {
    /// Open the ledger at `path`.
    ///
    /// # Errors
    ///
    /// The directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = LockedJson::open(path.into())?;
        info!(path = %file.path.display(), "Position ledger opened");
        Ok(Self { file })
    }

    /// Open `positions.json` inside `dir`.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_in(dir: &Path) -> Result<Self, StoreError> {
        Self::open(dir.join("positions.json"))
    }

    fn book_now(&self) -> Result<LedgerBook, StoreError> {
        self.file.read()
    }
}

impl PositionLedger for JsonFilePositionLedger {
    fn book(&self, booking: Booking) -> Result<bool, StoreError> {
        self.file
            .modify(|book: &mut LedgerBook| Ok::<_, StoreError>(book.book(booking)))
    }

    fn is_booked(&self, order_id: OrderId) -> Result<bool, StoreError> {
        Ok(self.book_now()?.is_booked(order_id))
    }

    fn contract_positions(
        &self,
        instrument: &InstrumentId,
    ) -> Result<BTreeMap<ContractId, i64>, StoreError> {
        Ok(self.book_now()?.contract_positions(instrument))
    }

    fn instruments(&self) -> Result<Vec<InstrumentId>, StoreError> {
        Ok(self.book_now()?.instruments())
    }
}

// ============================================================================
// Break store
// ============================================================================

/// File-backed implementation of [`BreakStore`].
#[derive(Debug)]
pub struct JsonFileBreakStore {
    file: LockedJson,
}

impl JsonFileBreakStore {
    /// Open the break store at `path`.
    ///
    /// # Errors
    ///
    /// The directory cannot be created, or an existing file cannot be read
    /// or decoded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = LockedJson::open(path.into())?;
        let open: BreakBook = file.read()?;
        info!(path = %file.path.display(), open = open.len(), "Break store opened");
        Ok(Self { file })
    }

    /// Open `breaks.json` inside `dir`.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_in(dir: &Path) -> Result<Self, StoreError> {
        Self::open(dir.join("breaks.json"))
    }

    fn book_now(&self) -> Result<BreakBook, StoreError> {
        self.file.read()
    }
}

impl BreakStore for JsonFileBreakStore {
    fn record(&self, position_break: PositionBreak) -> Result<bool, StoreError> {
        self.file
            .modify(|book: &mut BreakBook| Ok::<_, StoreError>(book.record(position_break)))
    }

    fn is_broken(&self, instrument: &InstrumentId) -> Result<bool, StoreError> {
        Ok(self.book_now()?.is_broken(instrument))
    }

    fn acknowledge(&self, instrument: &InstrumentId) -> Result<Option<PositionBreak>, StoreError> {
        self.file
            .modify(|book: &mut BreakBook| Ok::<_, StoreError>(book.acknowledge(instrument)))
    }

    fn open_breaks(&self) -> Result<Vec<PositionBreak>, StoreError> {
        Ok(self.book_now()?.open_breaks())
    }
}
