//! Track rows, favorites/history bookkeeping and path repair.

pub mod history;
pub mod path_repair;
pub mod track_store;
