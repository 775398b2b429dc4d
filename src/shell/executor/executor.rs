use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{dup2, execv, fork, getpid, pipe2, setpgid, ForkResult, Pid};

use super::job_manager::WaitOutcome;
use crate::shell::builtins::{self, Dispatch};
use crate::shell::error::{Result, ShellError, NOT_FOUND};
use crate::shell::parser::ast::Pipeline;
use crate::shell::parser::{Command, CommandSequence, JoinOp, RedirectOp, Redirection};
use crate::shell::session::Session;
use crate::shell::signals;
use crate::utils::path::find_file_in_path;

/// 启动前准备好的程序：fork 之后子进程不再分配内存查找路径。
struct Launch {
    path: CString,
    argv: Vec<CString>,
}

/// 子进程需要的全部描述符，在父进程里打开。
struct Wiring {
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    redirections: Vec<(i32, File)>,
}

pub struct Executor<'a> {
    session: &'a mut Session,
}

impl<'a> Executor<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// 执行整行命令，返回最后一个前台管道的退出码。
    ///
    /// 每个失败的阶段单独报告；后续 `;` 连接的命令照常执行。
    pub fn execute(&mut self, sequence: &CommandSequence) -> i32 {
        if sequence.is_empty() {
            return self.session.last_status;
        }
        let pipelines = sequence.pipelines();
        if sequence.background && pipelines.len() > 1 {
            let status = self.spawn_subshell(sequence).unwrap_or_else(|err| report(&err));
            self.session.last_status = status;
            return status;
        }

        let mut status = self.session.last_status;
        for pipeline in pipelines {
            let skip = match pipeline.after {
                JoinOp::AndThen => status != 0,
                JoinOp::OrElse => status == 0,
                _ => false,
            };
            if skip {
                debug!("跳过: {}", pipeline);
                continue;
            }
            status = self
                .run_pipeline(&pipeline, sequence.background)
                .unwrap_or_else(|err| report(&err));
            self.session.last_status = status;
            if self.session.quit_requested {
                break;
            }
        }
        status
    }

    fn run_pipeline(&mut self, pipeline: &Pipeline<'_>, background: bool) -> Result<i32> {
        if let [command] = pipeline.stages.as_slice() {
            if command.builtin {
                return self.run_builtin(command);
            }
        }

        let own_groups = self.session.terminal.own_groups();
        let last = pipeline.stages.len() - 1;
        let mut pgid: Option<Pid> = None;
        let mut pids = Vec::with_capacity(pipeline.stages.len());
        let mut input: Option<OwnedFd> = None;
        let mut last_failure = None;

        for (i, command) in pipeline.stages.iter().enumerate() {
            let (next_input, output) = if i < last {
                let (read, write) = pipe2(OFlag::O_CLOEXEC)?;
                (Some(read), Some(write))
            } else {
                (None, None)
            };
            let wiring = Wiring {
                stdin: input.take(),
                stdout: output,
                redirections: Vec::new(),
            };
            match self.spawn(command, wiring, pgid, background) {
                Ok(pid) => {
                    pgid.get_or_insert(pid);
                    pids.push(pid);
                }
                Err(err) => {
                    let status = report(&err);
                    if i == last {
                        last_failure = Some(status);
                    }
                }
            }
            input = next_input;
        }

        let Some(leader) = pgid else {
            return Ok(last_failure.unwrap_or(1));
        };
        let group = if own_groups {
            leader
        } else {
            self.session.terminal.shell_pgid()
        };
        let serial = self
            .session
            .jobs
            .add_job(group, &pids, pipeline.to_string(), background);

        if background {
            println!("[{}] {}", serial, pids.last().copied().unwrap_or(leader));
            return Ok(0);
        }

        let terminal = self.session.terminal;
        let outcome = self.session.jobs.wait_for(serial, &terminal, false)?;
        if let WaitOutcome::Stopped { serial, .. } = outcome {
            if let Some(job) = self.session.jobs.get(serial) {
                println!("\n{}", job);
            }
        }
        Ok(last_failure.unwrap_or(outcome.status()))
    }

    /// 单独的内建命令在 shell 进程内执行，输出重定向同样生效。
    fn run_builtin(&mut self, command: &Command) -> Result<i32> {
        let mut out: Box<dyn Write> = match command.redirection_for(libc::STDOUT_FILENO) {
            Some(redirection) => Box::new(open_redirection(redirection)?),
            None => Box::new(io::stdout()),
        };
        // 内建命令不读标准输入，但目标文件必须存在
        if let Some(redirection) = command.redirection_for(libc::STDIN_FILENO) {
            open_redirection(redirection)?;
        }
        match builtins::dispatch(&command.arguments, self.session, &mut out)? {
            Dispatch::Ran(status) => Ok(status),
            Dispatch::NotABuiltin => Err(ShellError::Launch {
                program: command.program().to_string(),
                reason: NOT_FOUND.to_string(),
            }),
        }
    }

    fn spawn(
        &mut self,
        command: &Command,
        mut wiring: Wiring,
        pgid: Option<Pid>,
        background: bool,
    ) -> Result<Pid> {
        let launch = if builtins::is_builtin(command.program()) {
            None
        } else {
            Some(prepare(command)?)
        };
        for redirection in &command.redirections {
            let file = open_redirection(redirection)?;
            wiring
                .redirections
                .push((redirection.operator.target_fd(), file));
        }

        let terminal = self.session.terminal;
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                // 父子进程都设置一次进程组，避免竞争
                if terminal.own_groups() {
                    if let Err(err) = setpgid(child, pgid.unwrap_or(child)) {
                        debug!("setpgid {} 失败: {}", child, err);
                    }
                }
                debug!("启动 {} pid {}", command, child);
                Ok(child)
            }
            ForkResult::Child => {
                if terminal.own_groups() {
                    let me = getpid();
                    let group = pgid.unwrap_or(me);
                    let _ = setpgid(me, group);
                    if !background {
                        terminal.give_to(group);
                    }
                }
                signals::reset_for_child();
                let status = self.run_child(command, launch, &wiring);
                let _ = io::stdout().flush();
                unsafe { libc::_exit(status) }
            }
        }
    }

    fn run_child(&mut self, command: &Command, launch: Option<Launch>, wiring: &Wiring) -> i32 {
        if let Err(err) = wire(wiring) {
            eprintln!("aspsh: {}: {}", command.program(), err);
            return 1;
        }

        let Some(launch) = launch else {
            let mut out = io::stdout();
            return match builtins::dispatch(&command.arguments, self.session, &mut out) {
                Ok(Dispatch::Ran(status)) => status,
                Ok(Dispatch::NotABuiltin) => 127,
                Err(err) => {
                    eprintln!("aspsh: {}", err);
                    err.status()
                }
            };
        };

        let err = match execv(&launch.path, &launch.argv) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        eprintln!("aspsh: {}: {}", command.program(), err.desc());
        match err {
            Errno::ENOENT => 127,
            _ => 126,
        }
    }

    /// 多个管道组成的后台序列：fork 一个子 shell 作为整个任务的进程组。
    fn spawn_subshell(&mut self, sequence: &CommandSequence) -> Result<i32> {
        let own_groups = self.session.terminal.own_groups();
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                if own_groups {
                    if let Err(err) = setpgid(child, child) {
                        debug!("setpgid {} 失败: {}", child, err);
                    }
                }
                let serial = self
                    .session
                    .jobs
                    .add_job(child, &[child], sequence.to_string(), true);
                debug!("后台子 shell [{}] pid {}", serial, child);
                println!("[{}] {}", serial, child);
                Ok(0)
            }
            ForkResult::Child => {
                if own_groups {
                    let me = getpid();
                    let _ = setpgid(me, me);
                }
                self.session.detach_for_subshell();
                let foreground = CommandSequence {
                    commands: sequence.commands.clone(),
                    background: false,
                };
                let status = self.execute(&foreground);
                let _ = io::stdout().flush();
                unsafe { libc::_exit(status) }
            }
        }
    }
}

fn report(err: &ShellError) -> i32 {
    warn!("{}", err);
    eprintln!("aspsh: {}", err);
    err.status()
}

/// 含 `/` 的程序名直接使用，否则在 PATH 中查找。
fn prepare(command: &Command) -> Result<Launch> {
    let program = command.program();
    let path = if program.contains('/') {
        PathBuf::from(program)
    } else {
        find_file_in_path(program).ok_or_else(|| ShellError::Launch {
            program: program.to_string(),
            reason: NOT_FOUND.to_string(),
        })?
    };
    let invalid = |_| ShellError::Launch {
        program: program.to_string(),
        reason: "argument contains a NUL byte".to_string(),
    };
    let path = CString::new(path.as_os_str().as_bytes()).map_err(invalid)?;
    let argv = command
        .arguments
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(invalid)?;
    Ok(Launch { path, argv })
}

fn open_redirection(redirection: &Redirection) -> Result<File> {
    let mut options = OpenOptions::new();
    match redirection.operator {
        RedirectOp::Input => options.read(true),
        RedirectOp::Output => options.write(true).create(true).truncate(true).mode(0o644),
        RedirectOp::Append => options.append(true).create(true).mode(0o644),
    };
    options
        .open(&redirection.filename)
        .map_err(|err| ShellError::runtime(&redirection.filename, err))
}

/// 先接管道，再接重定向：重定向优先。
fn wire(wiring: &Wiring) -> nix::Result<()> {
    if let Some(stdin) = &wiring.stdin {
        dup2(stdin.as_raw_fd(), libc::STDIN_FILENO)?;
    }
    if let Some(stdout) = &wiring.stdout {
        dup2(stdout.as_raw_fd(), libc::STDOUT_FILENO)?;
    }
    for (fd, file) in &wiring.redirections {
        dup2(file.as_raw_fd(), *fd)?;
    }
    Ok(())
}
