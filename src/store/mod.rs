pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    ClusterStore, EquipmentStore, HistoryStore, InstitutionStore, JournalStore, LocationStore,
    LookupStore, ParcelStore, PersonStore, ProbeStore, RoleAssignmentStore, Store, UserStore,
};
