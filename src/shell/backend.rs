use std::time::Duration;

use log::debug;

use crate::shell::completion::Completion;
use crate::shell::error::{Result, ShellError};
use crate::shell::executor::Executor;
use crate::shell::parser::{compile, CommandSequence, Feed, Lexer, Token};
use crate::shell::session::Session;
use crate::utils::config::Config;
use crate::utils::path::tildify;

/// 一行输入的解析结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse {
    /// 完整，可以编译执行
    Ready,
    /// 引号、转义或行尾运算符未闭合，需要续行
    NeedsMore,
}

/// 前端约定的返回码：-1 语法错误，0 可执行，1 需要续行。
pub fn parse_code(result: &Result<Parse>) -> i32 {
    match result {
        Ok(Parse::Ready) => 0,
        Ok(Parse::NeedsMore) => 1,
        Err(_) => -1,
    }
}

/// 前端与 shell 核心之间的接口。
pub trait Backend {
    fn parse(&mut self, line: &str) -> Result<Parse>;
    fn compile(&mut self) -> Result<()>;
    fn execute(&mut self) -> Result<i32>;
    /// 提示符前的状态行。
    fn build_information(&mut self) -> String;
    /// 返回替换起点和候选列表。
    fn build_tab_list(&mut self, line: &str, pos: usize) -> (usize, Vec<String>);

    fn prev_history(&mut self) -> String;
    fn next_history(&mut self) -> String;
    fn append_history(&mut self, line: &str);
    fn history_entries(&self) -> Vec<String>;

    /// 丢弃尚未完成的多行输入（Ctrl-C）。
    fn discard(&mut self);
    /// 输入结束（EOF）时收尾：未闭合的引号报告为语法错误。
    fn finish(&mut self) -> Result<Parse>;
    /// 在安全点回收子进程，返回需要告知用户的任务变化。
    fn notifications(&mut self) -> Vec<String>;
    fn should_quit(&self) -> bool;
    /// 结束会话，返回 shell 的退出码。
    fn shutdown(&mut self) -> i32;
}

pub struct ShellBackend {
    lexer: Lexer,
    tokens: Option<Vec<Token>>,
    compiled: Option<CommandSequence>,
    session: Session,
    completion: Completion,
}

impl ShellBackend {
    pub fn new(config: &Config) -> Self {
        Self::with_session(Session::start(config), config.completion_ttl)
    }

    pub fn with_session(session: Session, completion_ttl: Duration) -> Self {
        Self {
            lexer: Lexer::new(),
            tokens: None,
            compiled: None,
            session,
            completion: Completion::new(completion_ttl),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Backend for ShellBackend {
    fn parse(&mut self, line: &str) -> Result<Parse> {
        self.compiled = None;
        match self.lexer.feed(line)? {
            Feed::Complete(tokens) => {
                debug!("词法分析完成: {:?}", tokens);
                self.tokens = Some(tokens);
                Ok(Parse::Ready)
            }
            Feed::NeedsMore => Ok(Parse::NeedsMore),
        }
    }

    fn compile(&mut self) -> Result<()> {
        let tokens = self
            .tokens
            .take()
            .ok_or_else(|| ShellError::syntax("no complete command to compile"))?;
        let sequence = compile(tokens)?;
        debug!("编译结果: {}", sequence);
        self.compiled = Some(sequence);
        Ok(())
    }

    fn execute(&mut self) -> Result<i32> {
        let sequence = self
            .compiled
            .take()
            .ok_or_else(|| ShellError::syntax("no compiled command to execute"))?;
        Ok(Executor::new(&mut self.session).execute(&sequence))
    }

    fn build_information(&mut self) -> String {
        let cwd = self
            .session
            .dirs
            .current()
            .map(|dir| tildify(&dir))
            .unwrap_or_else(|_| "?".to_string());
        let (running, stopped) = self.session.jobs.counts();
        match (running, stopped) {
            (0, 0) => cwd,
            (running, 0) => format!("{} [{} running]", cwd, running),
            (0, stopped) => format!("{} [{} stopped]", cwd, stopped),
            (running, stopped) => format!("{} [{} running, {} stopped]", cwd, running, stopped),
        }
    }

    fn build_tab_list(&mut self, line: &str, pos: usize) -> (usize, Vec<String>) {
        self.completion.complete_line(line, pos)
    }

    fn prev_history(&mut self) -> String {
        self.session.history.prev().to_string()
    }

    fn next_history(&mut self) -> String {
        self.session.history.next().to_string()
    }

    fn append_history(&mut self, line: &str) {
        self.session.history.append(line);
    }

    fn history_entries(&self) -> Vec<String> {
        self.session.history.entries().to_vec()
    }

    fn discard(&mut self) {
        self.lexer.reset();
        self.tokens = None;
        self.compiled = None;
    }

    fn finish(&mut self) -> Result<Parse> {
        let tokens = self.lexer.finish()?;
        self.tokens = Some(tokens);
        Ok(Parse::Ready)
    }

    fn notifications(&mut self) -> Vec<String> {
        self.session
            .sync_jobs()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn should_quit(&self) -> bool {
        self.session.quit_requested
    }

    fn shutdown(&mut self) -> i32 {
        self.session.end();
        self.session.last_status
    }
}
