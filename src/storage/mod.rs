pub mod local_store;

pub use local_store::{LocalStore, RowMessage, APPEND_FLUSH_INTERVAL};
