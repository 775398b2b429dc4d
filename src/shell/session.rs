use std::env;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::shell::executor::job_manager::{Job, JobManager};
use crate::shell::executor::terminal::Terminal;
use crate::shell::history::History;
use crate::shell::signals::{self, SignalRelay};
use crate::utils::config::Config;
use crate::utils::path::home_dir;

/// 当前目录与 `cd -` 要用的上一个目录。
#[derive(Debug, Clone)]
pub struct Directories {
    previous: Option<PathBuf>,
    home: PathBuf,
}

impl Directories {
    pub fn new() -> Self {
        Self {
            previous: None,
            home: home_dir(),
        }
    }

    pub fn current(&self) -> io::Result<PathBuf> {
        env::current_dir()
    }

    pub fn previous(&self) -> Option<&Path> {
        self.previous.as_deref()
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// 切换工作目录；失败时目录保持不变。
    pub fn change(&mut self, target: &Path) -> io::Result<PathBuf> {
        let target = target.canonicalize()?;
        if !target.is_dir() {
            return Err(io::Error::new(io::ErrorKind::Other, "Not a directory"));
        }
        let before = env::current_dir().ok();
        env::set_current_dir(&target)?;
        if let Some(before) = before {
            self.previous = Some(before);
        }
        debug!("工作目录 -> {}", target.display());
        Ok(target)
    }
}

impl Default for Directories {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次交互会话拥有的全部可变状态。
///
/// 信号处理在 `start` 时安装、在 `end`（或 drop）时卸载。
pub struct Session {
    pub jobs: JobManager,
    pub terminal: Terminal,
    pub dirs: Directories,
    pub history: History,
    pub quit_requested: bool,
    pub last_status: i32,
    relay: Option<SignalRelay>,
}

impl Session {
    pub fn start(config: &Config) -> Self {
        // 先等到成为前台进程组，再忽略 SIGTTIN
        let mut terminal = Terminal::acquire();
        let relay = match SignalRelay::install() {
            Ok(relay) => Some(relay),
            Err(err) => {
                warn!("无法安装信号处理，改为轮询回收子进程: {}", err);
                None
            }
        };
        terminal.take_control();

        let history = History::load(&config.history_file).unwrap_or_else(|err| {
            warn!(
                "无法加载历史记录: {} {}",
                config.history_file.display(),
                err
            );
            History::new()
        });
        info!(
            "会话开始 pgid {} 交互模式 {}",
            terminal.shell_pgid(),
            terminal.is_interactive()
        );

        Self {
            relay,
            ..Self::with_terminal(terminal, history)
        }
    }

    /// 不接管终端、不安装信号处理的会话。
    pub fn detached() -> Self {
        Self::with_terminal(Terminal::detached(), History::new())
    }

    fn with_terminal(terminal: Terminal, history: History) -> Self {
        Self {
            jobs: JobManager::new(),
            terminal,
            dirs: Directories::new(),
            history,
            quit_requested: false,
            last_status: 0,
            relay: None,
        }
    }

    /// 在安全点回收子进程。只有收到过 SIGCHLD（或没有信号处理）时才真正调用 waitpid。
    pub fn sync_jobs(&mut self) -> Vec<Job> {
        if self.relay.is_none() || signals::take_child_event() {
            self.jobs.reap()
        } else {
            Vec::new()
        }
    }

    /// fork 出的后台子 shell 使用：丢掉父 shell 的任务表与信号处理。
    pub fn detach_for_subshell(&mut self) {
        self.relay = None;
        signals::reset_for_child();
        self.jobs = JobManager::new();
        self.terminal = Terminal::subshell();
    }

    pub fn end(&mut self) {
        if !self.jobs.is_empty() {
            info!("会话结束，挂断 {} 个任务", self.jobs.len());
            self.jobs.hangup_all();
        }
        self.relay = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::shell::executor::Executor;
    use crate::shell::parser::{compile, Feed, Lexer};

    #[test]
    fn test_change_to_missing_directory_keeps_cwd() {
        let mut dirs = Directories::new();
        let before = dirs.current().unwrap();
        assert!(dirs.change(Path::new("/definitely/not/here")).is_err());
        assert_eq!(dirs.current().unwrap(), before);
        assert!(dirs.previous().is_none());
    }

    #[test]
    fn test_sync_jobs_reaps_after_child_signal() {
        assert!(signals::in_child_process(|| {
            let mut session = Session::detached();
            session.relay = Some(SignalRelay::install().unwrap());
            signals::take_child_event();

            let sequence = match Lexer::new().feed("sleep 0.2 &").unwrap() {
                Feed::Complete(tokens) => compile(tokens).unwrap(),
                Feed::NeedsMore => return false,
            };
            assert_eq!(Executor::new(&mut session).execute(&sequence), 0);
            // 还没有 SIGCHLD，不会去回收
            assert!(session.sync_jobs().is_empty());
            assert_eq!(session.jobs.len(), 1);

            for _ in 0..200 {
                let notices = session.sync_jobs();
                if !notices.is_empty() {
                    assert_eq!(notices[0].command, "sleep 0.2");
                    return session.jobs.is_empty();
                }
                thread::sleep(Duration::from_millis(25));
            }
            false
        }));
    }

    #[test]
    fn test_detached_session_defaults() {
        let mut session = Session::detached();
        assert!(!session.terminal.is_interactive());
        assert!(session.jobs.is_empty());
        assert_eq!(session.last_status, 0);
        assert!(session.sync_jobs().is_empty());
        session.end();
    }
}
