use super::ast::Token;
use super::symbols::{starts_symbol, Relation, PARSE_SYMBOL_DICT};
use crate::shell::error::{Result, ShellError};

/// 跨行保留的扫描状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    Normal,
    /// 引号外的 `\`，下一个字符按字面量处理。
    Escaped,
    SingleQuote,
    DoubleQuote,
    /// 双引号内的 `\`。
    DoubleQuoteEscaped,
    /// 反引号内，原样收集直到配对的反引号。
    BackQuote,
    LineComplete,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Feed {
    Complete(Vec<Token>),
    NeedsMore,
}

/// 增量词法分析器：每次喂入一行，引号或转义未闭合时要求续行。
#[derive(Debug)]
pub struct Lexer {
    state: LexerState,
    tokens: Vec<Token>,
    word: String,
    in_word: bool,
    // 进入转义前是否已有正在累积的词；行尾续行时还原
    word_before_escape: bool,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Self {
            state: LexerState::Normal,
            tokens: Vec::new(),
            word: String::new(),
            in_word: false,
            word_before_escape: false,
        }
    }

    pub fn reset(&mut self) {
        self.state = LexerState::Normal;
        self.tokens.clear();
        self.word.clear();
        self.in_word = false;
        self.word_before_escape = false;
    }

    pub fn feed(&mut self, line: &str) -> Result<Feed> {
        if self.state == LexerState::LineComplete {
            self.state = LexerState::Normal;
        }

        let mut i = 0;
        while let Some(c) = line[i..].chars().next() {
            if self.state == LexerState::Normal && starts_symbol(c) {
                if let Some(len) = PARSE_SYMBOL_DICT.longest_match(&line[i..]) {
                    self.end_word();
                    if let Some(relation) = Relation::from_symbol(&line[i..i + len]) {
                        self.tokens.push(Token::Relation(relation));
                    }
                    i += len;
                    continue;
                }
            }
            self.scan_char(c);
            i += c.len_utf8();
        }

        self.end_of_line()
    }

    /// 输入流结束（EOF）时调用：未闭合的引号按语法错误报告。
    pub fn finish(&mut self) -> Result<Vec<Token>> {
        let outcome = match self.state {
            LexerState::Normal | LexerState::LineComplete => {
                self.end_word();
                check_placement(&self.tokens, true).map(|_| std::mem::take(&mut self.tokens))
            }
            LexerState::SingleQuote => Err(ShellError::syntax("unexpected EOF while looking for matching `''")),
            LexerState::DoubleQuote | LexerState::DoubleQuoteEscaped => {
                Err(ShellError::syntax("unexpected EOF while looking for matching `\"'"))
            }
            LexerState::BackQuote => Err(ShellError::syntax("unexpected EOF while looking for matching ``'")),
            LexerState::Escaped => Err(ShellError::syntax("unexpected EOF after `\\'")),
        };
        self.reset();
        outcome
    }

    fn scan_char(&mut self, c: char) {
        match self.state {
            LexerState::Normal | LexerState::LineComplete => match c {
                c if c.is_whitespace() => self.end_word(),
                '\\' => {
                    self.word_before_escape = self.in_word;
                    self.in_word = true;
                    self.state = LexerState::Escaped;
                }
                '\'' => {
                    self.in_word = true;
                    self.state = LexerState::SingleQuote;
                }
                '"' => {
                    self.in_word = true;
                    self.state = LexerState::DoubleQuote;
                }
                '`' => {
                    self.push(c);
                    self.state = LexerState::BackQuote;
                }
                _ => self.push(c),
            },
            LexerState::Escaped => {
                self.push(c);
                self.state = LexerState::Normal;
            }
            LexerState::SingleQuote => match c {
                '\'' => self.state = LexerState::Normal,
                _ => self.push(c),
            },
            LexerState::DoubleQuote => match c {
                '"' => self.state = LexerState::Normal,
                '\\' => self.state = LexerState::DoubleQuoteEscaped,
                _ => self.push(c),
            },
            LexerState::DoubleQuoteEscaped => {
                // 双引号里只有这几个字符可以被转义
                if !matches!(c, '$' | '`' | '"' | '\\') {
                    self.word.push('\\');
                }
                self.push(c);
                self.state = LexerState::DoubleQuote;
            }
            LexerState::BackQuote => {
                self.push(c);
                if c == '`' {
                    self.state = LexerState::Normal;
                }
            }
        }
    }

    fn end_of_line(&mut self) -> Result<Feed> {
        match self.state {
            LexerState::Normal | LexerState::LineComplete => {
                self.end_word();
                if let Err(err) = check_placement(&self.tokens, false) {
                    self.reset();
                    return Err(err);
                }
                if let Some(Token::Relation(Relation::Pipe | Relation::And | Relation::Or)) =
                    self.tokens.last()
                {
                    return Ok(Feed::NeedsMore);
                }
                self.state = LexerState::LineComplete;
                Ok(Feed::Complete(std::mem::take(&mut self.tokens)))
            }
            LexerState::Escaped => {
                // 反斜杠续行：换行本身被吃掉
                self.in_word = self.word_before_escape;
                self.state = LexerState::Normal;
                Ok(Feed::NeedsMore)
            }
            LexerState::DoubleQuoteEscaped => {
                self.state = LexerState::DoubleQuote;
                Ok(Feed::NeedsMore)
            }
            LexerState::SingleQuote | LexerState::DoubleQuote | LexerState::BackQuote => {
                self.push('\n');
                Ok(Feed::NeedsMore)
            }
        }
    }

    fn push(&mut self, c: char) {
        self.in_word = true;
        self.word.push(c);
    }

    fn end_word(&mut self) {
        if self.in_word {
            self.tokens.push(Token::Word(std::mem::take(&mut self.word)));
            self.in_word = false;
        }
    }
}

/// 运算符位置检查。`complete` 为 false 时允许以 `|` `&&` `||` 结尾（等待续行）。
fn check_placement(tokens: &[Token], complete: bool) -> Result<()> {
    let mut previous: Option<Relation> = None;
    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Word(_) => previous = None,
            Token::Relation(relation) => {
                let dangling = match previous {
                    Some(prev) => prev.is_redirect() || !relation.is_redirect(),
                    None => index == 0 && !relation.is_redirect(),
                };
                if dangling {
                    return Err(unexpected(*relation));
                }
                previous = Some(*relation);
            }
        }
    }
    match previous {
        Some(relation) if relation.is_redirect() => {
            Err(ShellError::syntax(format!("missing target after `{}'", relation)))
        }
        Some(relation @ (Relation::Pipe | Relation::And | Relation::Or)) if complete => {
            Err(ShellError::syntax(format!("unexpected end of input after `{}'", relation)))
        }
        _ => Ok(()),
    }
}

fn unexpected(relation: Relation) -> ShellError {
    ShellError::syntax(format!("unexpected token `{}'", relation))
}

#[cfg(test)]
impl Lexer {
    fn state(&self) -> LexerState {
        self.state
    }

    /// 没有待续的输入。
    fn is_idle(&self) -> bool {
        matches!(self.state, LexerState::Normal | LexerState::LineComplete)
            && self.tokens.is_empty()
            && !self.in_word
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn words(list: &[&str]) -> Vec<Token> {
        list.iter().map(|w| Token::word(w)).collect()
    }

    fn complete(line: &str) -> Vec<Token> {
        match Lexer::new().feed(line).unwrap() {
            Feed::Complete(tokens) => tokens,
            Feed::NeedsMore => panic!("expected complete line: {}", line),
        }
    }

    #[test]
    fn test_simple_command() {
        assert_eq!(complete("ls -l"), words(&["ls", "-l"]));
        assert_eq!(complete("   "), vec![]);
    }

    #[test]
    fn test_longest_match() {
        assert_eq!(
            complete("a && b"),
            vec![
                Token::word("a"),
                Token::Relation(Relation::And),
                Token::word("b")
            ]
        );
        assert_eq!(
            complete("a||b>>c"),
            vec![
                Token::word("a"),
                Token::Relation(Relation::Or),
                Token::word("b"),
                Token::Relation(Relation::RedirectAppend),
                Token::word("c")
            ]
        );
    }

    #[test]
    fn test_quotes_suppress_operators() {
        assert_eq!(
            complete(r#"echo "a | b" 'c && d' e\;f"#),
            words(&["echo", "a | b", "c && d", "e;f"])
        );
        assert_eq!(complete("echo '' \"\""), words(&["echo", "", ""]));
        assert_eq!(complete(r#"echo "x\"y\n""#), words(&["echo", "x\"y\\n"]));
    }

    #[test]
    fn test_back_quote_is_captured_raw() {
        assert_eq!(
            complete("echo `ls | wc`x"),
            words(&["echo", "`ls | wc`x"])
        );
    }

    #[test]
    fn test_open_single_quote_needs_more() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.feed("echo 'a").unwrap(), Feed::NeedsMore);
        assert_eq!(lexer.state(), LexerState::SingleQuote);
        let split = lexer.feed("b'").unwrap();
        assert_eq!(split, Lexer::new().feed("echo 'a\nb'").unwrap());
        assert_eq!(lexer.state(), LexerState::LineComplete);
    }

    #[test]
    fn test_open_double_quote_and_back_quote_need_more() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.feed("echo \"a").unwrap(), Feed::NeedsMore);
        assert_eq!(lexer.state(), LexerState::DoubleQuote);
        lexer.reset();
        assert_eq!(lexer.feed("echo `date").unwrap(), Feed::NeedsMore);
        assert_eq!(lexer.state(), LexerState::BackQuote);
    }

    #[test]
    fn test_trailing_backslash_joins_lines() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.feed("echo foo\\").unwrap(), Feed::NeedsMore);
        assert_eq!(lexer.state(), LexerState::Normal);
        assert_eq!(
            lexer.feed("bar baz").unwrap(),
            Feed::Complete(words(&["echo", "foobar", "baz"]))
        );

        let mut lexer = Lexer::new();
        assert_eq!(lexer.feed("echo \\").unwrap(), Feed::NeedsMore);
        assert_eq!(lexer.feed("").unwrap(), Feed::Complete(words(&["echo"])));
    }

    #[test]
    fn test_trailing_pipe_needs_more() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.feed("ls |").unwrap(), Feed::NeedsMore);
        assert_eq!(
            lexer.feed("wc").unwrap(),
            Feed::Complete(vec![
                Token::word("ls"),
                Token::Relation(Relation::Pipe),
                Token::word("wc")
            ])
        );
    }

    #[test]
    fn test_malformed_operators_are_rejected() {
        for line in ["| ls", "ls | | wc", "ls ; && wc", "echo >", "echo > | x", "&& ls", "ls & ; x"] {
            let mut lexer = Lexer::new();
            assert!(
                matches!(lexer.feed(line), Err(ShellError::Syntax(_))),
                "{} should be rejected",
                line
            );
            assert!(lexer.is_idle());
        }
    }

    #[test]
    fn test_finish_reports_unterminated_quote() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.feed("echo 'abc").unwrap(), Feed::NeedsMore);
        assert!(matches!(lexer.finish(), Err(ShellError::Syntax(_))));
        assert!(lexer.is_idle());
    }
}
