pub mod guard;
pub mod ledger;

pub use guard::{can_delete, checked_delete, dependent_collections, CollectionName, DeleteCheck};
pub use ledger::{current, ensure_appendable, ranges_overlap, sorted_by_start, validate_span};
