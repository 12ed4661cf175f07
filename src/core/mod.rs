pub mod engine;
pub mod extract;
pub mod lifecycle;
pub mod marketplace;
pub mod scheduler;
pub mod store;
pub mod terminal;
pub mod vault;
