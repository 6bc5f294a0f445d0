//! Daily time tracking for a list of tasks.
//!
//! A one-second ticker splits each tick evenly across the running tasks.
//! Tasks live in a flat `user/filename.txt` file and each task's total for
//! the day lives in `user/<id>/<date>_sec.txt`.

pub mod ledger;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod ui;
