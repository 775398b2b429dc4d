use std::fmt;

use once_cell::sync::Lazy;

use crate::utils::trie::PrefixIndex;

/// 运算符字母表中的关系符号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    RedirectIn,     // <
    RedirectOut,    // >
    RedirectAppend, // >>
    Semi,           // ;
    Pipe,           // |
    Or,             // ||
    Background,     // &
    And,            // &&
}

pub const PARSE_SYMBOLS: [&str; 8] = [">", ">>", "<", ";", "|", "||", "&", "&&"];

/// 补全用的字母表，额外包含环境变量符号。
pub const TAB_SYMBOLS: [&str; 9] = [">", ">>", "<", ";", "|", "||", "&", "&&", "$"];

pub static PARSE_SYMBOL_DICT: Lazy<PrefixIndex> =
    Lazy::new(|| PARSE_SYMBOLS.iter().copied().collect());

pub static TAB_SYMBOL_DICT: Lazy<PrefixIndex> =
    Lazy::new(|| TAB_SYMBOLS.iter().copied().collect());

impl Relation {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let relation = match symbol {
            "<" => Relation::RedirectIn,
            ">" => Relation::RedirectOut,
            ">>" => Relation::RedirectAppend,
            ";" => Relation::Semi,
            "|" => Relation::Pipe,
            "||" => Relation::Or,
            "&" => Relation::Background,
            "&&" => Relation::And,
            _ => return None,
        };
        Some(relation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::RedirectIn => "<",
            Relation::RedirectOut => ">",
            Relation::RedirectAppend => ">>",
            Relation::Semi => ";",
            Relation::Pipe => "|",
            Relation::Or => "||",
            Relation::Background => "&",
            Relation::And => "&&",
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            Relation::RedirectIn | Relation::RedirectOut | Relation::RedirectAppend
        )
    }

    /// `|` `;` `&&` `||`：分隔两个命令的符号。
    pub fn is_join(&self) -> bool {
        matches!(
            self,
            Relation::Semi | Relation::Pipe | Relation::Or | Relation::And
        )
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 能开始一个运算符的字符。
pub fn starts_symbol(c: char) -> bool {
    matches!(c, '>' | '<' | ';' | '|' | '&')
}
