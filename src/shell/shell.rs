use log::{debug, error, warn};
use std::error::Error;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::shell::backend::{Backend, Parse};
use crate::shell::readline::{lock, ReadlineError, ReadlineManager};
use crate::utils::config::Config;
use crate::utils::theme::Theme;

/// 提交一行输入后前端该做什么。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Prompt,
    Continue,
    Quit,
}

pub struct Shell<'a, B: Backend> {
    config: &'a Config,
    theme: Theme,
    backend: Arc<Mutex<B>>,
    // 多行输入已接收的部分
    pending: Vec<String>,
}

impl<'a, B: Backend + Send + 'static> Shell<'a, B> {
    pub fn new(config: &'a Config, backend: B) -> Self {
        Self {
            config,
            theme: Theme::load_theme(&config.theme),
            backend: Arc::new(Mutex::new(backend)),
            pending: Vec::new(),
        }
    }

    pub fn run(&mut self) -> Result<i32, Box<dyn Error>> {
        debug!("初始化 aspsh...");
        let mut readline = ReadlineManager::new(self.config, Arc::clone(&self.backend))?;
        println!(
            "{}",
            (self.theme.success_style)(self.theme.get_message("welcome"))
        );

        self.run_loop(&mut readline)?;

        let status = lock(&self.backend).shutdown();
        debug!("退出 aspsh，状态 {}", status);
        Ok(status)
    }

    fn run_loop(&mut self, readline: &mut ReadlineManager<B>) -> Result<(), Box<dyn Error>> {
        loop {
            self.print_notifications();
            std::io::stdout().flush()?;

            let prompt = if self.pending.is_empty() {
                let information = lock(&self.backend).build_information();
                format!(
                    "{} {}",
                    (self.theme.info_style)(information),
                    (self.theme.prompt_style)(self.theme.get_message("prompt"))
                )
            } else {
                (self.theme.prompt_style)(self.theme.get_message("continuation"))
            };

            match readline.readline(&prompt) {
                Ok(line) => {
                    if let Some(accepted) = self.accepted_text(&line) {
                        readline.add_history(accepted)?;
                    }
                    if self.submit(&line) == Step::Quit {
                        println!(
                            "{}",
                            (self.theme.success_style)(self.theme.get_message("exit"))
                        );
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl-C 丢弃未完成的多行输入
                    debug!("丢弃未完成的输入");
                    self.discard();
                }
                Err(ReadlineError::Eof) => {
                    warn!("接收到 EOF 信号，退出 aspsh...");
                    if !self.pending.is_empty() {
                        self.finish();
                    }
                    println!(
                        "\n{}",
                        (self.theme.warning_style)(self.theme.get_message("eof_signal"))
                    );
                    break;
                }
                Err(err) => {
                    error!("发生错误: {}", err);
                    self.print_error(&err);
                }
            }
        }
        Ok(())
    }

    /// 如果这一行会完成一条命令，返回整条命令的文本（用于 readline 历史）。
    fn accepted_text(&self, line: &str) -> Option<String> {
        if line.trim().is_empty() && self.pending.is_empty() {
            return None;
        }
        let mut text = self.pending.clone();
        text.push(line.to_string());
        Some(text.join("\n"))
    }

    /// 喂入一行：续行、执行或报告错误。
    pub fn submit(&mut self, line: &str) -> Step {
        self.pending.push(line.to_string());
        let parsed = lock(&self.backend).parse(line);
        match parsed {
            Ok(Parse::NeedsMore) => Step::Continue,
            Ok(Parse::Ready) => self.run_ready(),
            Err(err) => {
                self.record_pending();
                self.print_error(&err);
                Step::Prompt
            }
        }
    }

    /// EOF 时处理剩余输入。
    pub fn finish(&mut self) -> Step {
        let finished = lock(&self.backend).finish();
        match finished {
            Ok(_) => self.run_ready(),
            Err(err) => {
                self.record_pending();
                self.print_error(&err);
                Step::Prompt
            }
        }
    }

    pub fn discard(&mut self) {
        self.pending.clear();
        lock(&self.backend).discard();
    }

    fn run_ready(&mut self) -> Step {
        let text = self.record_pending();
        if text.trim().is_empty() {
            return Step::Prompt;
        }

        let backend = Arc::clone(&self.backend);
        let mut backend = lock(&backend);
        let result = backend.compile().and_then(|_| backend.execute());
        match result {
            Ok(status) => debug!("`{}` 退出码 {}", text, status),
            Err(err) => self.print_error(&err),
        }
        if backend.should_quit() {
            Step::Quit
        } else {
            Step::Prompt
        }
    }

    // 清空多行缓冲，整条命令记入历史
    fn record_pending(&mut self) -> String {
        let text = self.pending.join("\n");
        self.pending.clear();
        if !text.trim().is_empty() {
            lock(&self.backend).append_history(&text);
        }
        text
    }

    fn print_notifications(&self) {
        let notices = lock(&self.backend).notifications();
        for notice in notices {
            println!("{}", (self.theme.info_style)(notice));
        }
    }

    fn print_error(&self, err: &dyn std::fmt::Display) {
        eprintln!(
            "{}: {}",
            (self.theme.error_style)(self.theme.get_message("error")),
            err
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shell::error::{Result, ShellError};

    /// 按脚本应答的后端：以 `\` 结尾的行需要续行，`bad` 开头是语法错误。
    #[derive(Default)]
    struct ScriptedBackend {
        executed: Vec<String>,
        history: Vec<String>,
        current: Vec<String>,
        ready: bool,
        quit: bool,
        discarded: usize,
    }

    impl Backend for ScriptedBackend {
        fn parse(&mut self, line: &str) -> Result<Parse> {
            if line.starts_with("bad") {
                self.current.clear();
                return Err(ShellError::syntax("bad input"));
            }
            match line.strip_suffix('\\') {
                Some(head) => {
                    self.current.push(head.to_string());
                    Ok(Parse::NeedsMore)
                }
                None => {
                    self.current.push(line.to_string());
                    self.ready = true;
                    Ok(Parse::Ready)
                }
            }
        }

        fn compile(&mut self) -> Result<()> {
            if !self.ready {
                return Err(ShellError::syntax("nothing to compile"));
            }
            Ok(())
        }

        fn execute(&mut self) -> Result<i32> {
            self.ready = false;
            let command = self.current.concat();
            self.current.clear();
            if command == "quit" {
                self.quit = true;
            }
            self.executed.push(command);
            Ok(0)
        }

        fn build_information(&mut self) -> String {
            format!("{} executed", self.executed.len())
        }

        fn build_tab_list(&mut self, _: &str, pos: usize) -> (usize, Vec<String>) {
            (pos, Vec::new())
        }

        fn prev_history(&mut self) -> String {
            self.history.last().cloned().unwrap_or_default()
        }

        fn next_history(&mut self) -> String {
            String::new()
        }

        fn append_history(&mut self, line: &str) {
            self.history.push(line.to_string());
        }

        fn history_entries(&self) -> Vec<String> {
            self.history.clone()
        }

        fn discard(&mut self) {
            self.current.clear();
            self.discarded += 1;
        }

        fn finish(&mut self) -> Result<Parse> {
            self.ready = true;
            Ok(Parse::Ready)
        }

        fn notifications(&mut self) -> Vec<String> {
            Vec::new()
        }

        fn should_quit(&self) -> bool {
            self.quit
        }

        fn shutdown(&mut self) -> i32 {
            0
        }
    }

    fn shell(config: &Config) -> Shell<'_, ScriptedBackend> {
        Shell::new(config, ScriptedBackend::default())
    }

    #[test]
    fn test_continuation_then_execute() {
        let config = Config::default();
        let mut shell = shell(&config);
        assert_eq!(shell.submit("echo one \\"), Step::Continue);
        assert_eq!(shell.accepted_text("two").unwrap(), "echo one \\\ntwo");
        assert_eq!(shell.submit("two"), Step::Prompt);

        let backend = lock(&shell.backend);
        assert_eq!(backend.executed, vec!["echo one two"]);
        assert_eq!(backend.history, vec!["echo one \\\ntwo"]);
    }

    #[test]
    fn test_syntax_error_keeps_loop_alive() {
        let config = Config::default();
        let mut shell = shell(&config);
        assert_eq!(shell.submit("bad | |"), Step::Prompt);
        assert_eq!(shell.submit("ls"), Step::Prompt);
        let backend = lock(&shell.backend);
        assert_eq!(backend.executed, vec!["ls"]);
        assert_eq!(backend.history, vec!["bad | |", "ls"]);
    }

    #[test]
    fn test_discard_drops_pending_lines() {
        let config = Config::default();
        let mut shell = shell(&config);
        assert_eq!(shell.submit("first \\"), Step::Continue);
        shell.discard();
        assert!(shell.pending.is_empty());
        assert_eq!(shell.submit("second"), Step::Prompt);
        let backend = lock(&shell.backend);
        assert_eq!(backend.discarded, 1);
        assert_eq!(backend.executed, vec!["second"]);
    }

    #[test]
    fn test_quit_ends_loop() {
        let config = Config::default();
        let mut shell = shell(&config);
        assert_eq!(shell.submit("quit"), Step::Quit);
    }

    #[test]
    fn test_eof_finishes_pending_input() {
        let config = Config::default();
        let mut shell = shell(&config);
        assert_eq!(shell.submit("tail \\"), Step::Continue);
        assert_eq!(shell.finish(), Step::Prompt);
        assert_eq!(lock(&shell.backend).executed, vec!["tail "]);
    }

    #[test]
    fn test_blank_line_is_ignored() {
        let config = Config::default();
        let mut shell = shell(&config);
        assert_eq!(shell.accepted_text("   "), None);
        assert_eq!(shell.submit(""), Step::Prompt);
        assert!(lock(&shell.backend).executed.is_empty());
    }
}
