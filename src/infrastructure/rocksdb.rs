use crate::domain::keyspace::Account;
use crate::domain::payment::{Payment, TerminalOutcome};
use crate::domain::ports::{IndexAllocator, PaymentStore};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, TransactionDB,
    TransactionDBOptions,
};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding payment records keyed by account.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family holding the index allocator's counter.
pub const CF_ALLOCATOR: &str = "allocator";
const LAST_INDEX_KEY: &[u8] = b"last_index";

/// A persistent store implementation using a RocksDB `TransactionDB`.
///
/// Payments and the allocator counter live in separate Column Families of
/// the same database. Read-modify-write sequences (index allocation,
/// terminal transitions) run inside pessimistic transactions, so two
/// concurrent callers can never both observe the same prior value.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<TransactionDB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<TransactionDB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("payments" and "allocator") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payments = ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default());
        let cf_allocator = ColumnFamilyDescriptor::new(CF_ALLOCATOR, Options::default());

        let db = TransactionDB::open_cf_descriptors(
            &opts,
            &TransactionDBOptions::default(),
            path,
            vec![cf_payments, cf_allocator],
        )?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| GatewayError::StorageFailure(format!("{name} column family not found")))
    }

    fn scan_payments(&self, keep: impl Fn(&Payment) -> bool) -> Result<Vec<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let payment: Payment = serde_json::from_slice(&value)?;
            if keep(&payment) {
                payments.push(payment);
            }
        }
        payments.sort_by_key(|p| p.index);
        Ok(payments)
    }

    /// Loads, mutates and writes back one payment inside a transaction.
    ///
    /// `update` returns `false` to abandon the transaction without writing.
    fn update_payment(
        &self,
        account: &Account,
        update: impl FnOnce(&mut Payment) -> bool,
    ) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let txn = self.db.transaction();
        let bytes = txn
            .get_for_update_cf(cf, account.as_str(), true)?
            .ok_or(GatewayError::NotFound)?;
        let mut payment: Payment = serde_json::from_slice(&bytes)?;
        if !update(&mut payment) {
            txn.rollback()?;
            return Ok(None);
        }
        txn.put_cf(cf, account.as_str(), serde_json::to_vec(&payment)?)?;
        txn.commit()?;
        Ok(Some(payment))
    }

    fn allocate(&self) -> Result<u64> {
        let cf = self.cf(CF_ALLOCATOR)?;
        let txn = self.db.transaction();
        let last = match txn.get_for_update_cf(cf, LAST_INDEX_KEY, true)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    GatewayError::StorageFailure("allocator counter is corrupt".into())
                })?;
                u64::from_be_bytes(bytes)
            }
            None => 0,
        };
        let next = last
            .checked_add(1)
            .ok_or_else(|| GatewayError::Conflict("index space exhausted".into()))?;
        txn.put_cf(cf, LAST_INDEX_KEY, next.to_be_bytes())?;
        txn.commit()?;
        Ok(next)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn save(&self, payment: &Payment) -> Result<()> {
        let cf = self.cf(CF_PAYMENTS)?;
        let value = serde_json::to_vec(payment)?;
        self.db.put_cf(cf, payment.account.as_str(), value)?;
        Ok(())
    }

    async fn load(&self, account: &Account) -> Result<Payment> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, account.as_str())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(GatewayError::NotFound),
        }
    }

    async fn list_active(&self) -> Result<Vec<Payment>> {
        self.scan_payments(Payment::is_active)
    }

    async fn list_all(&self) -> Result<Vec<Payment>> {
        self.scan_payments(|_| true)
    }

    async fn mark_checking(&self, account: &Account) -> Result<()> {
        self.update_payment(account, Payment::mark_checking)?;
        Ok(())
    }

    async fn finalize(
        &self,
        account: &Account,
        outcome: &TerminalOutcome,
    ) -> Result<Option<Payment>> {
        self.update_payment(account, |payment| payment.apply(outcome))
    }

    async fn delete(&self, account: &Account) -> Result<()> {
        let cf = self.cf(CF_PAYMENTS)?;
        self.db.delete_cf(cf, account.as_str())?;
        Ok(())
    }
}

#[async_trait]
impl IndexAllocator for RocksDBStore {
    async fn next_index(&self) -> Result<u64> {
        self.allocate()
    }
}
