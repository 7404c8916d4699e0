pub mod backup_exchange;
pub mod core;
pub mod grades;
pub mod reports;
pub mod setup;
pub mod students;
