pub mod backend;
pub mod builtins;
pub mod completion;
pub mod error;
pub mod executor;
pub mod history;
pub mod parser;
mod readline;
pub mod session;
mod shell;
pub mod signals;

pub use backend::ShellBackend;
pub use shell::Shell;
