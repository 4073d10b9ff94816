//! # CMEI DB
//!
//! SQLite-backed store standing in for the hosted relational backend.
//! Every status/location mutation runs in one transaction together with
//! its occupancy update, queue recalculation and history row.

mod backend;
pub mod db;

pub use db::{StatusCount, WaitlistDb};
