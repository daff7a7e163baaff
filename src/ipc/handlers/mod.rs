pub mod analytics;
pub mod calendar;
pub mod catalog;
pub mod core;
pub mod reconcile;
pub mod roster;
pub mod schedule;
pub mod sessions;
