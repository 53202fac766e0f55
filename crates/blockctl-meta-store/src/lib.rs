//! blockctl Metadata Store - redb-backed volume records
//!
//! Every lifecycle operation runs inside one [`VolumeTx`]: reads come from a
//! snapshot taken at `begin`, writes are buffered and only become visible to
//! other transactions on `commit`. Allocation counters live in the same
//! database but are updated in their own short write transactions.

pub mod store;
pub mod tables;
pub mod types;

// Re-exports
pub use store::{MetaStore, MetaStoreError, MetaStoreResult, VolumeTx};
pub use types::{AoeCounter, AoeExport, ExportDescriptor, IscsiCounter, IscsiExport, VolumeRecord};
