//! Session statistics and history

pub mod store;
