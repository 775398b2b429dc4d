use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag as WF, WaitStatus as WS};
use nix::unistd::Pid;

use super::terminal::Terminal;
use crate::shell::error::{Result, ShellError};
use crate::shell::signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped(Signal),
    Exited(i32),
    Killed(Signal),
}

impl ProcessState {
    fn from_wait(status: WS) -> Option<(Pid, Self)> {
        match status {
            WS::Exited(pid, code) => Some((pid, ProcessState::Exited(code))),
            WS::Signaled(pid, sig, _core_dumped) => Some((pid, ProcessState::Killed(sig))),
            WS::Stopped(pid, sig) => Some((pid, ProcessState::Stopped(sig))),
            WS::Continued(pid) => Some((pid, ProcessState::Running)),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::Killed(_))
    }

    /// POSIX 约定：被信号终止或停止时为 128+信号值。
    pub fn status(&self) -> i32 {
        match self {
            ProcessState::Running => 0,
            ProcessState::Exited(code) => *code,
            ProcessState::Stopped(sig) | ProcessState::Killed(sig) => 128 + *sig as i32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    pub state: ProcessState,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub pgid: Pid,
    pub serial: usize,
    pub command: String,
    pub processes: Vec<Process>,
    pub background: bool,
    pub is_current: bool,
    pub is_previous: bool,
    reported: JobState,
}

impl Job {
    fn new(pgid: Pid, serial: usize, pids: &[Pid], command: String, background: bool) -> Self {
        Self {
            pgid,
            serial,
            command,
            processes: pids
                .iter()
                .map(|&pid| Process {
                    pid,
                    state: ProcessState::Running,
                })
                .collect(),
            background,
            is_current: false,
            is_previous: false,
            reported: JobState::Running,
        }
    }

    pub fn state(&self) -> JobState {
        if self.processes.iter().all(|p| p.state.is_finished()) {
            JobState::Done
        } else if self
            .processes
            .iter()
            .any(|p| matches!(p.state, ProcessState::Stopped(_)))
        {
            JobState::Stopped
        } else {
            JobState::Running
        }
    }

    pub fn leader(&self) -> Pid {
        self.processes.first().map(|p| p.pid).unwrap_or(self.pgid)
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes.iter().map(|p| p.pid)
    }

    /// 最后一段的退出状态；停止时取停止信号。
    pub fn exit_status(&self) -> i32 {
        if let Some(stopped) = self
            .processes
            .iter()
            .find(|p| matches!(p.state, ProcessState::Stopped(_)))
        {
            return stopped.state.status();
        }
        self.processes.last().map(|p| p.state.status()).unwrap_or(0)
    }

    fn live_pids(&self) -> Vec<Pid> {
        self.processes
            .iter()
            .filter(|p| !p.state.is_finished())
            .map(|p| p.pid)
            .collect()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.state() {
            JobState::Running => "running",
            JobState::Stopped => "stopped",
            JobState::Done => "done",
        };
        let mark = if self.is_current {
            "+"
        } else if self.is_previous {
            "-"
        } else {
            " "
        };
        write!(
            f,
            "[{}]{} {} {:<8} {}",
            self.serial,
            mark,
            self.leader(),
            status,
            self.command
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i32),
    Stopped { serial: usize, status: i32 },
}

impl WaitOutcome {
    pub fn status(&self) -> i32 {
        match self {
            WaitOutcome::Exited(status) => *status,
            WaitOutcome::Stopped { status, .. } => *status,
        }
    }
}

/// 任务表：按序号索引的任务，以及 pid 到序号的反查表。
///
/// 两张表只在主循环里修改，始终保持一致：每个未回收的 pid
/// 恰好属于一个任务。序号回收复用，总是取最小的空闲序号。
#[derive(Debug, Clone, Default)]
pub struct JobManager {
    jobs: BTreeMap<usize, Job>,
    pids: HashMap<Pid, usize>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn get(&self, serial: usize) -> Option<&Job> {
        self.jobs.get(&serial)
    }

    pub fn owner(&self, pid: Pid) -> Option<usize> {
        self.pids.get(&pid).copied()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// (运行中, 已停止)
    pub fn counts(&self) -> (usize, usize) {
        self.jobs
            .values()
            .fold((0, 0), |(running, stopped), job| match job.state() {
                JobState::Running => (running + 1, stopped),
                JobState::Stopped => (running, stopped + 1),
                JobState::Done => (running, stopped),
            })
    }

    pub fn next_serial(&self) -> usize {
        let mut index = 1;
        while self.jobs.contains_key(&index) {
            index += 1;
        }
        index
    }

    pub fn add_job(&mut self, pgid: Pid, pids: &[Pid], command: String, background: bool) -> usize {
        let serial = self.next_serial();
        let job = Job::new(pgid, serial, pids, command, background);
        for &pid in pids {
            self.pids.insert(pid, serial);
        }
        debug!("新任务 [{}] pgid {} pids {:?}", serial, pgid, pids);
        self.jobs.insert(serial, job);
        self.update_marks(serial);
        serial
    }

    pub fn remove(&mut self, serial: usize) -> Option<Job> {
        let job = self.jobs.remove(&serial)?;
        for pid in job.pids() {
            // 已结束成员的 pid 可能已被新任务复用
            if self.owner(pid) == Some(serial) {
                self.pids.remove(&pid);
            }
        }

        if job.is_current {
            // 如果删除的是当前任务，将上一个任务提升为当前任务
            let promoted = self
                .jobs
                .values()
                .find(|job| job.is_previous)
                .or_else(|| self.jobs.values().last())
                .map(|job| job.serial);
            if let Some(serial) = promoted {
                self.update_marks(serial);
            }
        }
        debug!("移除任务 [{}]", serial);
        Some(job)
    }

    fn update_marks(&mut self, current: usize) {
        for job in self.jobs.values_mut() {
            if job.serial == current {
                job.is_current = true;
                job.is_previous = false;
            } else if job.is_current {
                job.is_current = false;
                job.is_previous = true;
            } else {
                job.is_previous = false;
            }
        }
    }

    /// 记录一次 waitpid 结果。已结束的 pid 从反查表中移除。
    pub fn record(&mut self, pid: Pid, state: ProcessState) {
        let Some(serial) = self.owner(pid) else {
            warn!("回收到不在任务表中的进程 {}: {:?}", pid, state);
            return;
        };
        let Some(job) = self.jobs.get_mut(&serial) else {
            warn!("进程 {} 指向不存在的任务 [{}]", pid, serial);
            self.pids.remove(&pid);
            return;
        };
        if let Some(process) = job.processes.iter_mut().find(|p| p.pid == pid) {
            debug!("[{}] 进程 {} -> {:?}", serial, pid, state);
            process.state = state;
        }
        if state.is_finished() {
            self.pids.remove(&pid);
        }
    }

    /// 非阻塞地回收所有已登记进程的状态变化。
    ///
    /// 返回状态发生变化的后台任务（结束或停止），用于提示用户。
    /// 结束的任务从表中删除，其序号可被复用。
    pub fn reap(&mut self) -> Vec<Job> {
        let live: Vec<Pid> = self.pids.keys().copied().collect();
        for pid in live {
            match waitpid(pid, Some(WF::WNOHANG | WF::WUNTRACED | WF::WCONTINUED)) {
                Ok(WS::StillAlive) => {}
                Ok(status) => {
                    if let Some((pid, state)) = ProcessState::from_wait(status) {
                        self.record(pid, state);
                    }
                }
                Err(Errno::ECHILD) => {
                    warn!("进程 {} 已被回收，按退出处理", pid);
                    self.record(pid, ProcessState::Exited(0));
                }
                Err(err) => warn!("waitpid {} 失败: {}", pid, err),
            }
        }

        let mut notices = Vec::new();
        let serials: Vec<usize> = self.jobs.keys().copied().collect();
        for serial in serials {
            let Some(job) = self.jobs.get_mut(&serial) else {
                continue;
            };
            let state = job.state();
            if state == job.reported {
                continue;
            }
            job.reported = state;
            match state {
                JobState::Done => {
                    if let Some(job) = self.remove(serial) {
                        if job.background {
                            notices.push(job);
                        }
                    }
                }
                JobState::Stopped => {
                    job.background = true;
                    notices.push(job.clone());
                }
                JobState::Running => {}
            }
        }
        notices
    }

    /// 前台等待任务直到全部退出或有成员停止。
    ///
    /// `resume` 为真时先交出终端再发送 SIGCONT（`fg`）。
    pub fn wait_for(&mut self, serial: usize, terminal: &Terminal, resume: bool) -> Result<WaitOutcome> {
        let Some(job) = self.jobs.get_mut(&serial) else {
            return Err(no_such_job("fg", serial));
        };
        job.background = false;
        let pgid = job.pgid;
        if resume {
            continue_processes(job);
        }
        self.update_marks(serial);

        terminal.give_to(pgid);
        signals::set_foreground(Some(pgid));
        if resume {
            if let Err(err) = killpg(pgid, Signal::SIGCONT) {
                warn!("SIGCONT [{}] 失败: {}", serial, err);
            }
        }
        let waited = self.wait_members(serial);
        signals::set_foreground(None);
        terminal.reclaim();
        waited?;

        let Some(job) = self.jobs.get_mut(&serial) else {
            return Ok(WaitOutcome::Exited(0));
        };
        let status = job.exit_status();
        match job.state() {
            JobState::Done => {
                self.remove(serial);
                Ok(WaitOutcome::Exited(status))
            }
            _ => {
                job.background = true;
                job.reported = JobState::Stopped;
                Ok(WaitOutcome::Stopped { serial, status })
            }
        }
    }

    fn wait_members(&mut self, serial: usize) -> Result<()> {
        let pids = match self.jobs.get(&serial) {
            Some(job) => job.live_pids(),
            None => return Ok(()),
        };
        for pid in pids {
            loop {
                match waitpid(pid, Some(WF::WUNTRACED)) {
                    Ok(status) => {
                        let Some((pid, state)) = ProcessState::from_wait(status) else {
                            continue;
                        };
                        self.record(pid, state);
                        match state {
                            ProcessState::Stopped(_) => return Ok(()),
                            ProcessState::Running => continue,
                            _ => break,
                        }
                    }
                    Err(Errno::EINTR) => continue,
                    Err(Errno::ECHILD) => {
                        warn!("等待的进程 {} 已不存在", pid);
                        self.record(pid, ProcessState::Exited(0));
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    /// 让停止的任务在后台继续运行（`bg`）。
    pub fn resume_background(&mut self, serial: usize) -> Result<&Job> {
        let Some(job) = self.jobs.get_mut(&serial) else {
            return Err(no_such_job("bg", serial));
        };
        killpg(job.pgid, Signal::SIGCONT)?;
        continue_processes(job);
        job.background = true;
        job.reported = JobState::Running;
        self.update_marks(serial);
        self.jobs
            .get(&serial)
            .ok_or_else(|| no_such_job("bg", serial))
    }

    /// 向任务的整个进程组发送信号；停止的任务额外发送 SIGCONT 以便它处理信号。
    pub fn signal(&mut self, serial: usize, signal: Signal) -> Result<()> {
        let Some(job) = self.jobs.get(&serial) else {
            return Err(no_such_job("kill", serial));
        };
        killpg(job.pgid, signal)?;
        if job.state() == JobState::Stopped {
            killpg(job.pgid, Signal::SIGCONT)?;
        }
        debug!("向任务 [{}] 发送 {:?}", serial, signal);
        Ok(())
    }

    /// 会话结束时挂断所有剩余任务。
    pub fn hangup_all(&mut self) {
        for job in self.jobs.values() {
            if let Err(err) = killpg(job.pgid, Signal::SIGHUP) {
                debug!("SIGHUP [{}] 失败: {}", job.serial, err);
            }
            if job.state() == JobState::Stopped {
                let _ = killpg(job.pgid, Signal::SIGCONT);
            }
        }
    }
}

fn continue_processes(job: &mut Job) {
    for process in job.processes.iter_mut() {
        if let ProcessState::Stopped(_) = process.state {
            process.state = ProcessState::Running;
        }
    }
    job.reported = JobState::Running;
}

fn no_such_job(name: &str, serial: usize) -> ShellError {
    ShellError::runtime(name, format!("%{}: no such job", serial))
}
