pub mod database;
pub mod storage;

pub use database::*;
pub use storage::*;
