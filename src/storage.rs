use crate::ledger::{self, Applied, ApplyMode, Ledger, Transaction, TransferError, User};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Mutex, MutexGuard};

// bincode for compact values, zstd on top; reads fall back to uncompressed bincode.

const CF_TRANSACTION: &str = "transaction";
const CF_USER: &str = "user";
const CF_META: &str = "meta";
const ZSTD_LEVEL: i32 = 3;

pub struct Store {
    pub db: DB,
    path: String,
    // held by every writer of the user and transaction column families
    write_lock: Mutex<()>,
}

impl Store {
    /// Write, read back and delete a probe row in the meta column family.
    pub fn health_check(&self) -> Result<()> {
        const PROBE: &[u8] = b"__probe";
        let meta = self.cf(CF_META)?;
        self.db.put_cf(meta, PROBE, b"ok").context("ledger store is not writable")?;
        let echoed = self.db.get_cf(meta, PROBE).context("ledger store is not readable")?;
        if echoed.as_deref() != Some(&b"ok"[..]) {
            anyhow::bail!("ledger store returned a different value than was written");
        }
        self.db.delete_cf(meta, PROBE).context("ledger store refused a delete")?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' missing from ledger store", name))
    }

    pub fn open(base_path: &str) -> Result<Self> {
        let db_path = base_path.to_string();
        let cf_names = ["default", CF_TRANSACTION, CF_USER, CF_META];

        let mut cf_opts = Options::default();
        cf_opts.set_write_buffer_size(16 * 1024 * 1024);
        cf_opts.set_max_write_buffer_number(2);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let wal_dir = format!("{db_path}/logs");
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("Failed to create database directory '{db_path}'"))?;
        std::fs::create_dir_all(&wal_dir).ok();
        db_opts.set_wal_dir(&wal_dir);

        db_opts.set_use_fsync(false);
        db_opts.set_bytes_per_sync(1024 * 1024);
        db_opts.set_max_open_files(256);
        db_opts.set_keep_log_file_num(10);
        db_opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::TolerateCorruptedTailRecords);

        let db = DB::open_cf_descriptors(&db_opts, &db_path, cf_descriptors)
            .with_context(|| format!("Failed to open database at '{db_path}'"))?;

        let store = Store { db, path: db_path, write_lock: Mutex::new(()) };
        store.health_check().context("ledger store failed its startup probe")?;
        tracing::debug!("database opened at {}", store.path);
        Ok(store)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let compressed = encode_value(cf, key, value)?;
        let handle = self.cf(cf)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(cf == CF_TRANSACTION);
        self.db
            .put_cf_opt(handle, key, &compressed, &write_opts)
            .with_context(|| format!("Failed to PUT to database for key '{key:?}' in CF '{cf}'"))
    }

    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;

        match self.db.get_cf(handle, key)? {
            Some(value) => decode_value(&value)
                .map(Some)
                .with_context(|| format!("Failed to deserialize value for key '{key:?}' in CF '{cf}'")),
            None => Ok(None),
        }
    }

    /// Every decodable value in a column family; undecodable rows are skipped.
    pub fn iterate<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (key, value) = item?;
            match decode_value(&value) {
                Ok(v) => out.push(v),
                Err(e) => tracing::warn!("skipping undecodable row {:?} in CF '{}': {:#}", key, cf, e),
            }
        }
        Ok(out)
    }

    pub fn all_users(&self) -> Result<Vec<User>> {
        self.iterate(CF_USER)
    }

    pub fn all_transactions(&self) -> Result<Vec<Transaction>> {
        self.iterate(CF_TRANSACTION)
    }

    pub fn put_meta<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put(CF_META, key.as_bytes(), value)
    }

    pub fn get_meta<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(CF_META, key.as_bytes())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().with_context(|| "Failed to flush database")?;
        if let Err(e) = self.db.flush_wal(true) {
            tracing::warn!("WAL flush failed (non-critical): {}", e);
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.db.cancel_all_background_work(true);
        Ok(())
    }
}

fn encode_value<T: Serialize>(cf: &str, key: &[u8], value: &T) -> Result<Vec<u8>> {
    let encoded = bincode::serialize(value)
        .with_context(|| format!("Failed to serialize value for key '{key:?}' in CF '{cf}'"))?;
    zstd::encode_all(&encoded[..], ZSTD_LEVEL)
        .with_context(|| format!("Failed to compress value for key '{key:?}' in CF '{cf}'"))
}

fn decode_value<T: DeserializeOwned>(value: &[u8]) -> Result<T> {
    if let Ok(decompressed) = zstd::decode_all(value) {
        if let Ok(v) = bincode::deserialize(&decompressed) {
            return Ok(v);
        }
    }
    Ok(bincode::deserialize(value)?)
}

impl Ledger for Store {
    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        self.get(CF_TRANSACTION, id.as_bytes())
    }

    fn upsert_transaction(&self, tx: &Transaction) -> Result<()> {
        let _writer = self.writer();
        self.put(CF_TRANSACTION, tx.id.as_bytes(), tx)
    }

    fn get_user(&self, username: &str) -> Result<Option<User>> {
        self.get(CF_USER, username.as_bytes())
    }

    fn put_user(&self, user: &User) -> Result<()> {
        let _writer = self.writer();
        self.put(CF_USER, user.username.as_bytes(), user)
    }

    fn update_balance(&self, username: &str, new_balance: f64) -> Result<()> {
        let _writer = self.writer();
        let mut user = self
            .get_user(username)?
            .ok_or_else(|| anyhow::anyhow!("user '{}' not found", username))?;
        user.balance = new_balance;
        self.put(CF_USER, username.as_bytes(), &user)
    }

    fn apply_transfer(&self, tx: &Transaction, mode: ApplyMode) -> Result<Applied, TransferError> {
        let _writer = self.writer();
        if self.get_transaction(&tx.id)?.is_some() {
            return Ok(Applied::Duplicate);
        }
        let sender = self.get_user(&tx.from_username)?;
        let recipient = self.get_user(&tx.to_username)?;
        let rows = ledger::settle(tx, mode, sender, recipient)?;

        // account rows and the record land in one batch
        let mut batch = WriteBatch::default();
        let users = self.cf(CF_USER)?;
        for user in &rows {
            let key = user.username.as_bytes();
            batch.put_cf(users, key, encode_value(CF_USER, key, user)?);
        }
        let key = tx.id.as_bytes();
        batch.put_cf(self.cf(CF_TRANSACTION)?, key, encode_value(CF_TRANSACTION, key, tx)?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .write_opt(batch, &write_opts)
            .with_context(|| format!("Failed to write transfer {} to the ledger store", tx.id))?;
        Ok(Applied::Recorded)
    }

    fn transactions_for_user(&self, username: &str) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .all_transactions()?
            .into_iter()
            .filter(|t| t.from_username == username || t.to_username == username)
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(txs)
    }
}
