use std::fmt;
use std::io;

use thiserror::Error;

/// 内建命令参数个数越界的那一侧。计数包含命令名本身。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArityBound {
    Min(usize),
    Max(usize),
}

impl fmt::Display for ArityBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArityBound::Min(n) => write!(f, "too few arguments (expects at least {})", n - 1),
            ArityBound::Max(n) => write!(f, "too many arguments (expects at most {})", n - 1),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("{name}: {bound}")]
    Arity {
        name: String,
        bound: ArityBound,
        given: usize,
    },

    #[error("{program}: {reason}")]
    Launch { program: String, reason: String },

    #[error("{name}: {message}")]
    Runtime { name: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Sys(#[from] nix::Error),
}

impl ShellError {
    pub fn syntax(message: impl Into<String>) -> Self {
        ShellError::Syntax(message.into())
    }

    pub fn runtime(name: &str, message: impl fmt::Display) -> Self {
        ShellError::Runtime {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// 报告给前端后应当记录的退出码。
    pub fn status(&self) -> i32 {
        match self {
            ShellError::Syntax(_) | ShellError::Arity { .. } => 2,
            ShellError::Launch { reason, .. } if reason == NOT_FOUND => 127,
            ShellError::Launch { .. } => 126,
            _ => 1,
        }
    }
}

pub const NOT_FOUND: &str = "command not found";

pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_message_counts_user_arguments() {
        let err = ShellError::Arity {
            name: "cd".to_string(),
            bound: ArityBound::Max(2),
            given: 4,
        };
        assert_eq!(err.to_string(), "cd: too many arguments (expects at most 1)");
        assert_eq!(err.status(), 2);
    }

    #[test]
    fn test_launch_status_follows_posix() {
        let missing = ShellError::Launch {
            program: "nope".to_string(),
            reason: NOT_FOUND.to_string(),
        };
        assert_eq!(missing.status(), 127);
        let denied = ShellError::Launch {
            program: "./x".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(denied.status(), 126);
    }
}
