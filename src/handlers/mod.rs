pub mod balances;
pub mod connections;
pub mod discovery;
pub mod history;
pub mod sources;
pub mod sync;
