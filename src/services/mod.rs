pub mod index_sync;
pub mod linkage;
pub mod schedule;
