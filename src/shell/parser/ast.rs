use std::fmt;

use super::symbols::Relation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Relation(Relation),
}

impl Token {
    pub fn word(text: &str) -> Self {
        Token::Word(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    Input,  // <
    Output, // >
    Append, // >>
}

impl RedirectOp {
    pub fn from_relation(relation: Relation) -> Option<Self> {
        match relation {
            Relation::RedirectIn => Some(RedirectOp::Input),
            Relation::RedirectOut => Some(RedirectOp::Output),
            Relation::RedirectAppend => Some(RedirectOp::Append),
            _ => None,
        }
    }

    /// 被重定向的文件描述符：输入为 0，输出（截断或追加）为 1。
    pub fn target_fd(&self) -> i32 {
        match self {
            RedirectOp::Input => libc::STDIN_FILENO,
            RedirectOp::Output | RedirectOp::Append => libc::STDOUT_FILENO,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            RedirectOp::Input => "<",
            RedirectOp::Output => ">",
            RedirectOp::Append => ">>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub operator: RedirectOp,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub arguments: Vec<String>,
    pub redirections: Vec<Redirection>,
    /// 在 shell 进程内直接执行，不 fork。
    pub builtin: bool,
}

impl Command {
    pub fn program(&self) -> &str {
        self.arguments.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// 同方向的重定向后者覆盖前者。
    pub fn redirect(&mut self, redirection: Redirection) {
        let fd = redirection.operator.target_fd();
        self.redirections
            .retain(|existing| existing.operator.target_fd() != fd);
        self.redirections.push(redirection);
    }

    pub fn redirection_for(&self, fd: i32) -> Option<&Redirection> {
        self.redirections
            .iter()
            .find(|r| r.operator.target_fd() == fd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_words::join(&self.arguments))?;
        for redirection in &self.redirections {
            write!(
                f,
                " {} {}",
                redirection.operator.symbol(),
                shell_words::quote(&redirection.filename)
            )?;
        }
        Ok(())
    }
}

/// 当前命令与下一条命令的关系。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOp {
    Pipe,
    Sequential,
    AndThen,
    OrElse,
    None,
}

impl JoinOp {
    pub fn from_relation(relation: Relation) -> Option<Self> {
        match relation {
            Relation::Pipe => Some(JoinOp::Pipe),
            Relation::Semi => Some(JoinOp::Sequential),
            Relation::And => Some(JoinOp::AndThen),
            Relation::Or => Some(JoinOp::OrElse),
            _ => None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            JoinOp::Pipe => " | ",
            JoinOp::Sequential => "; ",
            JoinOp::AndThen => " && ",
            JoinOp::OrElse => " || ",
            JoinOp::None => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSequence {
    pub commands: Vec<(Command, JoinOp)>,
    pub background: bool,
}

/// 由管道连接的一组命令，以及它与前一组之间的关系。
#[derive(Debug)]
pub struct Pipeline<'a> {
    pub after: JoinOp,
    pub stages: Vec<&'a Command>,
}

impl CommandSequence {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// 按 `;` `&&` `||` 切分成管道组。第一组的 `after` 为 `JoinOp::None`。
    pub fn pipelines(&self) -> Vec<Pipeline<'_>> {
        let mut pipelines = Vec::new();
        let mut current = Pipeline {
            after: JoinOp::None,
            stages: Vec::new(),
        };
        for (command, join) in &self.commands {
            current.stages.push(command);
            match join {
                JoinOp::Pipe => {}
                JoinOp::None => break,
                other => {
                    let next = Pipeline {
                        after: *other,
                        stages: Vec::new(),
                    };
                    pipelines.push(std::mem::replace(&mut current, next));
                }
            }
        }
        if !current.stages.is_empty() {
            pipelines.push(current);
        }
        pipelines
    }
}

impl fmt::Display for Pipeline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(JoinOp::Pipe.symbol())?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

impl fmt::Display for CommandSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (command, join) in &self.commands {
            write!(f, "{}{}", command, join.symbol())?;
        }
        if self.background {
            f.write_str(" &")?;
        }
        Ok(())
    }
}
