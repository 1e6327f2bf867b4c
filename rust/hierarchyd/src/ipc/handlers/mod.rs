pub mod browse;
pub mod core;
pub mod forms;
pub mod records;
pub mod session;
