use std::io::{self, IsTerminal};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgrp, getpid, setpgid, tcgetpgrp, tcsetpgrp, Pid};

/// 终端控制权与进程组策略。
#[derive(Debug, Clone, Copy)]
pub struct Terminal {
    interactive: bool,
    own_groups: bool,
    shell_pgid: Pid,
}

impl Terminal {
    /// 交互式 shell：等到自己成为前台进程组为止。
    /// 必须在忽略 SIGTTIN 之前调用。
    pub fn acquire() -> Self {
        if !io::stdin().is_terminal() {
            return Self::detached();
        }
        loop {
            let pgrp = getpgrp();
            match foreground_group() {
                Ok(fg) if fg == pgrp => break,
                Ok(_) => {
                    let _ = killpg(pgrp, Signal::SIGTTIN);
                }
                Err(err) => {
                    warn!("无法读取终端前台进程组: {}", err);
                    return Self::detached();
                }
            }
        }
        Terminal {
            interactive: true,
            own_groups: true,
            shell_pgid: getpgrp(),
        }
    }

    /// 不控制终端，但每个任务仍然是独立的进程组。
    pub fn detached() -> Self {
        Terminal {
            interactive: false,
            own_groups: true,
            shell_pgid: getpgrp(),
        }
    }

    /// 后台子 shell：子进程留在子 shell 自己的进程组里。
    pub fn subshell() -> Self {
        Terminal {
            interactive: false,
            own_groups: false,
            shell_pgid: getpgrp(),
        }
    }

    /// 把 shell 放进自己的进程组并拿到终端。需要先忽略 SIGTTOU。
    pub fn take_control(&mut self) {
        if !self.interactive {
            return;
        }
        let pid = getpid();
        match setpgid(pid, pid) {
            Ok(()) => {}
            // 会话首进程不能再换组，沿用当前组
            Err(Errno::EPERM) => debug!("shell 已是会话首进程"),
            Err(err) => warn!("setpgid 失败: {}", err),
        }
        self.shell_pgid = getpgrp();
        if let Err(err) = set_foreground_group(self.shell_pgid) {
            warn!("无法获取终端控制权，关闭任务控制: {}", err);
            self.interactive = false;
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn own_groups(&self) -> bool {
        self.own_groups
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    pub fn give_to(&self, pgid: Pid) {
        if !self.interactive {
            return;
        }
        if let Err(err) = set_foreground_group(pgid) {
            debug!("tcsetpgrp {} 失败: {}", pgid, err);
        }
    }

    pub fn reclaim(&self) {
        self.give_to(self.shell_pgid);
    }
}

fn foreground_group() -> nix::Result<Pid> {
    tcgetpgrp(io::stdin())
}

fn set_foreground_group(pgid: Pid) -> nix::Result<()> {
    tcsetpgrp(io::stdin(), pgid)
}
