mod executor;
pub mod job_manager;
pub mod terminal;

pub use executor::Executor;
