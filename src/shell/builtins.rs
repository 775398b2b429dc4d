//! 内建命令表。
//!
//! 每个内建命令声明参数个数上下界（计数包含命令名），
//! 分发前先检查个数，越界时不调用处理函数。

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use nix::sys::signal::Signal;
use once_cell::sync::Lazy;

use crate::shell::error::{ArityBound, Result, ShellError};
use crate::shell::executor::job_manager::WaitOutcome;
use crate::shell::session::Session;
use crate::shell::signals;
use crate::utils::path::tildify;

type Handler = fn(&[String], &mut Session, &mut dyn Write) -> Result<i32>;

pub struct Builtin {
    handler: Handler,
    min_args: usize,
    /// `None` 表示不限
    max_args: Option<usize>,
}

impl Builtin {
    fn new(handler: Handler, min_args: usize, max_args: Option<usize>) -> Self {
        Self {
            handler,
            min_args,
            max_args,
        }
    }

    fn check(&self, args: &[String]) -> Result<()> {
        let given = args.len();
        let bound = match self.max_args {
            _ if given < self.min_args => ArityBound::Min(self.min_args),
            Some(max) if given > max => ArityBound::Max(max),
            _ => return Ok(()),
        };
        Err(ShellError::Arity {
            name: args.first().cloned().unwrap_or_default(),
            bound,
            given,
        })
    }
}

static BUILTINS: Lazy<HashMap<&'static str, Builtin>> = Lazy::new(|| {
    HashMap::from([
        ("pwd", Builtin::new(pwd, 1, Some(1))),
        ("cd", Builtin::new(cd, 1, Some(2))),
        ("history", Builtin::new(history, 1, Some(1))),
        ("quit", Builtin::new(quit, 1, Some(1))),
        ("exit", Builtin::new(quit, 1, Some(1))),
        ("bg", Builtin::new(bg, 2, Some(2))),
        ("fg", Builtin::new(fg, 2, Some(2))),
        ("jobs", Builtin::new(jobs, 1, Some(1))),
        ("kill", Builtin::new(kill, 2, Some(2))),
        ("echo", Builtin::new(echo, 1, None)),
        ("sleep", Builtin::new(sleep, 2, Some(2))),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ran(i32),
    NotABuiltin,
}

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains_key(name)
}

pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BUILTINS.keys().copied().collect();
    names.sort_unstable();
    names
}

pub fn dispatch(args: &[String], session: &mut Session, out: &mut dyn Write) -> Result<Dispatch> {
    let Some(name) = args.first() else {
        return Ok(Dispatch::NotABuiltin);
    };
    let Some(builtin) = BUILTINS.get(name.as_str()) else {
        return Ok(Dispatch::NotABuiltin);
    };
    builtin.check(args)?;
    debug!("内建命令: {:?}", args);
    let status = (builtin.handler)(args, session, out)?;
    out.flush()?;
    Ok(Dispatch::Ran(status))
}

fn pwd(_: &[String], session: &mut Session, out: &mut dyn Write) -> Result<i32> {
    let current = session.dirs.current()?;
    writeln!(out, "{}", current.display())?;
    Ok(0)
}

fn cd(args: &[String], session: &mut Session, out: &mut dyn Write) -> Result<i32> {
    let (target, announce) = match args.get(1).map(String::as_str) {
        None => (session.dirs.home().to_path_buf(), false),
        Some("-") => match session.dirs.previous() {
            Some(previous) => (previous.to_path_buf(), true),
            None => return Err(ShellError::runtime("cd", "OLDPWD not set")),
        },
        Some(dir) => (PathBuf::from(shellexpand::tilde(dir).as_ref()), false),
    };

    let changed = session
        .dirs
        .change(&target)
        .map_err(|err| ShellError::runtime("cd", format!("{}: {}", target.display(), err)))?;
    if announce {
        writeln!(out, "{}", tildify(&changed))?;
    }
    Ok(0)
}

fn history(_: &[String], session: &mut Session, out: &mut dyn Write) -> Result<i32> {
    for (i, line) in session.history.entries().iter().enumerate() {
        writeln!(out, "{:>5}  {}", i + 1, line)?;
    }
    Ok(0)
}

fn quit(_: &[String], session: &mut Session, _: &mut dyn Write) -> Result<i32> {
    session.quit_requested = true;
    Ok(session.last_status)
}

fn jobs(_: &[String], session: &mut Session, out: &mut dyn Write) -> Result<i32> {
    // 先回收，保证看到的是最新快照
    for finished in session.jobs.reap() {
        writeln!(out, "{}", finished)?;
    }
    for job in session.jobs.jobs() {
        writeln!(out, "{}", job)?;
    }
    Ok(0)
}

fn bg(args: &[String], session: &mut Session, out: &mut dyn Write) -> Result<i32> {
    let serial = parse_serial("bg", &args[1])?;
    let job = session.jobs.resume_background(serial)?;
    writeln!(out, "[{}]+ {} &", job.serial, job.command)?;
    Ok(0)
}

fn fg(args: &[String], session: &mut Session, out: &mut dyn Write) -> Result<i32> {
    let serial = parse_serial("fg", &args[1])?;
    let Some(job) = session.jobs.get(serial) else {
        return Err(ShellError::runtime("fg", format!("%{}: no such job", serial)));
    };
    writeln!(out, "{}", job.command)?;
    out.flush()?;

    let terminal = session.terminal;
    match session.jobs.wait_for(serial, &terminal, true)? {
        WaitOutcome::Exited(status) => Ok(status),
        WaitOutcome::Stopped { serial, status } => {
            if let Some(job) = session.jobs.get(serial) {
                writeln!(out, "\n{}", job)?;
            }
            Ok(status)
        }
    }
}

fn kill(args: &[String], session: &mut Session, _: &mut dyn Write) -> Result<i32> {
    let serial = parse_serial("kill", &args[1])?;
    session.jobs.signal(serial, Signal::SIGTERM)?;
    Ok(0)
}

fn echo(args: &[String], _: &mut Session, out: &mut dyn Write) -> Result<i32> {
    writeln!(out, "{}", args[1..].join(" "))?;
    Ok(0)
}

// 分片睡眠，期间检查 Ctrl-C
const SLEEP_SLICE: Duration = Duration::from_millis(50);

fn sleep(args: &[String], _: &mut Session, _: &mut dyn Write) -> Result<i32> {
    let interval = args[1]
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| ShellError::runtime("sleep", format!("invalid time interval '{}'", args[1])))?;

    signals::take_interrupt();
    let started = Instant::now();
    loop {
        let left = interval.saturating_sub(started.elapsed());
        if left.is_zero() {
            return Ok(0);
        }
        thread::sleep(left.min(SLEEP_SLICE));
        if signals::take_interrupt() {
            debug!("sleep 被中断");
            return Ok(128 + Signal::SIGINT as i32);
        }
    }
}

/// 接受 `3` 或 `%3`。
fn parse_serial(name: &str, arg: &str) -> Result<usize> {
    arg.strip_prefix('%')
        .unwrap_or(arg)
        .parse::<usize>()
        .map_err(|_| ShellError::runtime(name, format!("{}: no such job", arg)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        shell_words::split(line).unwrap()
    }

    fn run(line: &str, session: &mut Session) -> (Result<Dispatch>, String) {
        let mut out = Vec::new();
        let result = dispatch(&args(line), session, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_cd_with_too_many_arguments_keeps_directory() {
        let mut session = Session::detached();
        let before = std::env::current_dir().unwrap();
        let (result, _) = run("cd a b c", &mut session);
        match result {
            Err(ShellError::Arity { name, bound, given }) => {
                assert_eq!(name, "cd");
                assert_eq!(bound, ArityBound::Max(2));
                assert_eq!(given, 4);
            }
            other => panic!("expected arity error, got {:?}", other),
        }
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_missing_arguments() {
        let mut session = Session::detached();
        for line in ["fg", "bg", "kill", "sleep"] {
            let (result, _) = run(line, &mut session);
            assert!(matches!(
                result,
                Err(ShellError::Arity {
                    bound: ArityBound::Min(2),
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_cd_to_missing_directory_is_runtime_error() {
        let mut session = Session::detached();
        let before = std::env::current_dir().unwrap();
        let (result, _) = run("cd /no/such/dir", &mut session);
        let err = result.unwrap_err();
        assert_eq!(err.status(), 1);
        assert!(err.to_string().starts_with("cd: /no/such/dir"));
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_cd_dash_without_previous() {
        let mut session = Session::detached();
        let (result, _) = run("cd -", &mut session);
        assert!(matches!(result, Err(ShellError::Runtime { .. })));
    }

    #[test]
    fn test_echo_and_pwd() {
        let mut session = Session::detached();
        let (result, out) = run("echo hello   'big world'", &mut session);
        assert_eq!(result.unwrap(), Dispatch::Ran(0));
        assert_eq!(out, "hello big world\n");

        let (_, out) = run("pwd", &mut session);
        assert_eq!(
            out.trim_end(),
            std::env::current_dir().unwrap().display().to_string()
        );
    }

    #[test]
    fn test_not_a_builtin() {
        let mut session = Session::detached();
        let (result, out) = run("ls -l", &mut session);
        assert_eq!(result.unwrap(), Dispatch::NotABuiltin);
        assert!(out.is_empty());
        assert!(!is_builtin("ls"));
        assert!(names().contains(&"jobs"));
    }

    #[test]
    fn test_quit_and_exit_request_shutdown() {
        for line in ["quit", "exit"] {
            let mut session = Session::detached();
            session.last_status = 3;
            let (result, _) = run(line, &mut session);
            assert_eq!(result.unwrap(), Dispatch::Ran(3));
            assert!(session.quit_requested);
        }
    }

    #[test]
    fn test_job_builtins_on_unknown_serial() {
        let mut session = Session::detached();
        for line in ["fg 1", "bg %2", "kill 7", "fg abc"] {
            let (result, _) = run(line, &mut session);
            assert!(
                matches!(result, Err(ShellError::Runtime { .. })),
                "{} should fail",
                line
            );
        }
        let (result, out) = run("jobs", &mut session);
        assert_eq!(result.unwrap(), Dispatch::Ran(0));
        assert!(out.is_empty());
    }

    #[test]
    fn test_history_listing() {
        let mut session = Session::detached();
        session.history.append("ls");
        session.history.append("pwd");
        let (_, out) = run("history", &mut session);
        assert_eq!(out, "    1  ls\n    2  pwd\n");
    }

    #[test]
    fn test_sleep_rejects_bad_interval() {
        let mut session = Session::detached();
        let (result, _) = run("sleep soon", &mut session);
        assert!(matches!(result, Err(ShellError::Runtime { .. })));
        let (result, _) = run("sleep 0", &mut session);
        assert_eq!(result.unwrap(), Dispatch::Ran(0));
    }

    #[test]
    fn test_sleep_rejects_interval_out_of_range() {
        let mut session = Session::detached();
        for line in ["sleep 1e20", "sleep -1", "sleep nan", "sleep inf"] {
            let (result, _) = run(line, &mut session);
            assert!(matches!(result, Err(ShellError::Runtime { .. })), "{}", line);
        }
    }

    #[test]
    fn test_sleep_stops_on_interrupt() {
        assert!(signals::in_child_process(|| {
            let _relay = signals::SignalRelay::install().unwrap();
            let mut session = Session::detached();
            let interrupter = std::thread::spawn(|| {
                std::thread::sleep(Duration::from_millis(100));
                nix::sys::signal::kill(nix::unistd::getpid(), Signal::SIGINT).unwrap();
            });
            let started = Instant::now();
            let (result, _) = run("sleep 5", &mut session);
            interrupter.join().unwrap();
            result.unwrap() == Dispatch::Ran(130) && started.elapsed() < Duration::from_secs(5)
        }));
    }
}
