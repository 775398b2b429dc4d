pub mod ast;
pub mod compiler;
pub mod lexer;
pub mod symbols;

pub use ast::{Command, CommandSequence, JoinOp, RedirectOp, Redirection, Token};
pub use compiler::compile;
pub use lexer::{Feed, Lexer};
