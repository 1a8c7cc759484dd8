//! Tabular datasets: the table model, file loading and the shared store.

pub mod loader;
pub mod store;
pub mod table;

pub use store::DatasetStore;
pub use table::Table;
