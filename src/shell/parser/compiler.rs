use super::ast::{Command, CommandSequence, JoinOp, RedirectOp, Redirection, Token};
use super::symbols::Relation;
use crate::shell::builtins;
use crate::shell::error::{Result, ShellError};

/// 把词法单元编译成命令序列。
pub struct Compiler {
    tokens: std::vec::IntoIter<Token>,
    sequence: CommandSequence,
    current: Command,
}

impl Compiler {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into_iter(),
            sequence: CommandSequence::default(),
            current: Command::default(),
        }
    }

    pub fn compile(mut self) -> Result<CommandSequence> {
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Word(word) => self.current.arguments.push(word),
                Token::Relation(relation) => self.relation(relation)?,
            }
        }

        if self.current.is_empty() {
            // 只允许以 `;` 结尾
            if let Some((_, join)) = self.sequence.commands.last_mut() {
                match join {
                    JoinOp::Sequential => *join = JoinOp::None,
                    JoinOp::None => {}
                    _ => return Err(ShellError::syntax("unexpected end of input")),
                }
            }
        } else {
            self.close(JoinOp::None);
        }

        self.mark_builtins();
        Ok(self.sequence)
    }

    fn relation(&mut self, relation: Relation) -> Result<()> {
        if let Some(operator) = RedirectOp::from_relation(relation) {
            return self.redirection(operator, relation);
        }
        if let Some(join) = JoinOp::from_relation(relation) {
            if self.current.is_empty() {
                return Err(unexpected(relation));
            }
            self.close(join);
            return Ok(());
        }
        // 只剩 `&`：必须是最后一个单元
        if self.current.is_empty() || !self.tokens.as_slice().is_empty() {
            return Err(unexpected(relation));
        }
        self.sequence.background = true;
        Ok(())
    }

    fn redirection(&mut self, operator: RedirectOp, relation: Relation) -> Result<()> {
        if self.current.is_empty() {
            return Err(unexpected(relation));
        }
        match self.tokens.next() {
            Some(Token::Word(filename)) => {
                self.current.redirect(Redirection { operator, filename });
                Ok(())
            }
            Some(Token::Relation(next)) => Err(unexpected(next)),
            None => Err(ShellError::syntax(format!(
                "missing target after `{}'",
                relation
            ))),
        }
    }

    fn close(&mut self, join: JoinOp) {
        let command = std::mem::take(&mut self.current);
        self.sequence.commands.push((command, join));
    }

    // 只有不在管道中、且不在后台运行的内建命令才在 shell 进程内执行
    fn mark_builtins(&mut self) {
        let background = self.sequence.background;
        let mut after_pipe = false;
        for (command, join) in self.sequence.commands.iter_mut() {
            let piped = after_pipe || *join == JoinOp::Pipe;
            command.builtin = !background && !piped && builtins::is_builtin(command.program());
            after_pipe = *join == JoinOp::Pipe;
        }
    }
}

pub fn compile(tokens: Vec<Token>) -> Result<CommandSequence> {
    Compiler::new(tokens).compile()
}

fn unexpected(relation: Relation) -> ShellError {
    ShellError::syntax(format!("unexpected token `{}'", relation))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shell::parser::lexer::{Feed, Lexer};

    fn tokens(line: &str) -> Vec<Token> {
        match Lexer::new().feed(line).unwrap() {
            Feed::Complete(tokens) => tokens,
            Feed::NeedsMore => panic!("incomplete line"),
        }
    }

    fn compile_line(line: &str) -> Result<CommandSequence> {
        compile(tokens(line))
    }

    #[test]
    fn test_pipeline_of_three() {
        let seq = compile_line("cmd1 | cmd2 | cmd3").unwrap();
        assert_eq!(seq.len(), 3);
        let joins: Vec<JoinOp> = seq.commands.iter().map(|(_, j)| *j).collect();
        assert_eq!(joins, vec![JoinOp::Pipe, JoinOp::Pipe, JoinOp::None]);
        assert!(seq.commands.iter().all(|(c, _)| !c.builtin));
        assert!(!seq.background);
    }

    #[test]
    fn test_builtin_inside_pipeline_is_forked() {
        let seq = compile_line("echo hi | wc -w").unwrap();
        assert!(!seq.commands[0].0.builtin);
        assert_eq!(seq.commands[1].0.arguments, vec!["wc", "-w"]);

        let seq = compile_line("cd /tmp && pwd").unwrap();
        assert!(seq.commands.iter().all(|(c, _)| c.builtin));
    }

    #[test]
    fn test_joins() {
        let seq = compile_line("a ; b && c || d").unwrap();
        let joins: Vec<JoinOp> = seq.commands.iter().map(|(_, j)| *j).collect();
        assert_eq!(
            joins,
            vec![JoinOp::Sequential, JoinOp::AndThen, JoinOp::OrElse, JoinOp::None]
        );
        assert_eq!(seq.pipelines().len(), 4);
    }

    #[test]
    fn test_redirections_override_same_direction() {
        let seq = compile_line("sort < in > a >> b").unwrap();
        let command = &seq.commands[0].0;
        assert_eq!(command.arguments, vec!["sort"]);
        assert_eq!(command.redirections.len(), 2);
        let out = command.redirection_for(libc::STDOUT_FILENO).unwrap();
        assert_eq!(out.operator, RedirectOp::Append);
        assert_eq!(out.filename, "b");
        let input = command.redirection_for(libc::STDIN_FILENO).unwrap();
        assert_eq!(input.filename, "in");
    }

    #[test]
    fn test_background_applies_to_sequence() {
        let seq = compile_line("sleep 5 &").unwrap();
        assert!(seq.background);
        assert_eq!(seq.len(), 1);
        assert!(!seq.commands[0].0.builtin);
    }

    #[test]
    fn test_trailing_semicolon_is_allowed() {
        let seq = compile_line("ls ;").unwrap();
        assert_eq!(seq.commands, vec![(Command {
            arguments: vec!["ls".to_string()],
            ..Default::default()
        }, JoinOp::None)]);
    }

    #[test]
    fn test_syntax_errors() {
        let word = |w: &str| Token::word(w);
        let rel = Token::Relation;
        let cases = vec![
            vec![word("cmd1"), rel(Relation::Pipe), rel(Relation::Pipe), word("cmd2")],
            vec![rel(Relation::RedirectOut), word("f"), word("ls")],
            vec![word("ls"), rel(Relation::RedirectOut)],
            vec![word("a"), rel(Relation::Background), word("b")],
            vec![rel(Relation::Background)],
            vec![word("a"), rel(Relation::And)],
        ];
        for tokens in cases {
            assert!(
                matches!(compile(tokens.clone()), Err(ShellError::Syntax(_))),
                "{:?} should be rejected",
                tokens
            );
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(compile(Vec::new()).unwrap().is_empty());
    }
}
