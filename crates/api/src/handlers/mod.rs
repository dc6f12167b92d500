pub mod providers;
pub mod tasks;
