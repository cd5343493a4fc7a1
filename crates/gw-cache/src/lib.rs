//! C7 — query fingerprinting and the tiered result cache.

pub mod key;
pub mod store;

pub use key::fingerprint;
pub use store::{CacheConfig, CacheMetricsSnapshot, CacheStore};

impl CacheStore {
    /// DDL against `table`: invalidate every entry whose fingerprint
    /// references it.
    pub fn invalidate_ddl(&self, table: &str) {
        self.invalidate_table(table);
    }

    /// DML against `table`: invalidate entries that read it. In this
    /// cache only read-shaped results are ever stored, so the matcher is
    /// the same one DDL invalidation uses.
    pub fn invalidate_dml(&self, table: &str) {
        self.invalidate_table(table);
    }

    /// Pool reset: invalidate everything.
    pub fn invalidate_pool_reset(&self) {
        self.invalidate_all();
    }
}
