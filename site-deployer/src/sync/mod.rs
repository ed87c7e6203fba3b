pub mod diff;
pub mod schedule;
