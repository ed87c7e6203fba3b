pub mod progress;
pub mod pump;
