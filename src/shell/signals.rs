//! 信号中转。
//!
//! 信号处理函数只做异步信号安全的事：SIGCHLD 置一个原子标记，
//! 由主循环在安全点统一回收子进程并更新任务表；SIGINT/SIGTSTP
//! 在有前台进程组时转发给它；没有时 SIGINT 只置中断标记，
//! 供 shell 内执行的内建命令检查。

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

static CHILD_EVENT: AtomicBool = AtomicBool::new(false);
static FOREGROUND_PGID: AtomicI32 = AtomicI32::new(0);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INSTALLED: AtomicBool = AtomicBool::new(false);

const FORWARDED: [Signal; 2] = [Signal::SIGINT, Signal::SIGTSTP];
const IGNORED: [Signal; 4] = [
    Signal::SIGQUIT,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGPIPE,
];
// 子进程需要恢复默认处理的信号
const JOB_CONTROL: [Signal; 7] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGCHLD,
    Signal::SIGPIPE,
];

extern "C" fn on_child_event(_: libc::c_int) {
    let saved = errno::errno();
    CHILD_EVENT.store(true, Ordering::SeqCst);
    errno::set_errno(saved);
}

extern "C" fn on_terminal_signal(signo: libc::c_int) {
    let saved = errno::errno();
    let pgid = FOREGROUND_PGID.load(Ordering::SeqCst);
    if pgid > 0 {
        unsafe {
            libc::killpg(pgid, signo);
        }
    } else if signo == libc::SIGINT {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }
    errno::set_errno(saved);
}

/// 会话期间安装的信号处理；drop 时恢复原来的处理方式。
pub struct SignalRelay {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalRelay {
    pub fn install() -> nix::Result<Self> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(Errno::EBUSY);
        }
        let mut relay = SignalRelay {
            previous: Vec::new(),
        };

        let restart = SaFlags::SA_RESTART;
        relay.set(
            Signal::SIGCHLD,
            SigHandler::Handler(on_child_event),
            restart,
        )?;
        for signal in FORWARDED {
            relay.set(signal, SigHandler::Handler(on_terminal_signal), restart)?;
        }
        for signal in IGNORED {
            relay.set(signal, SigHandler::SigIgn, SaFlags::empty())?;
        }
        debug!("信号处理已安装");
        Ok(relay)
    }

    fn set(&mut self, signal: Signal, handler: SigHandler, flags: SaFlags) -> nix::Result<()> {
        let action = SigAction::new(handler, flags, SigSet::empty());
        let previous = unsafe { sigaction(signal, &action)? };
        self.previous.push((signal, previous));
        Ok(())
    }
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        for (signal, action) in self.previous.drain(..).rev() {
            if let Err(err) = unsafe { sigaction(signal, &action) } {
                warn!("恢复信号处理失败 {:?}: {}", signal, err);
            }
        }
        FOREGROUND_PGID.store(0, Ordering::SeqCst);
        INSTALLED.store(false, Ordering::SeqCst);
        debug!("信号处理已卸载");
    }
}

/// 取出并清除“子进程状态可能变化”的标记。
pub fn take_child_event() -> bool {
    CHILD_EVENT.swap(false, Ordering::SeqCst)
}

pub fn set_foreground(pgid: Option<Pid>) {
    let raw = pgid.map(Pid::as_raw).unwrap_or(0);
    FOREGROUND_PGID.store(raw, Ordering::SeqCst);
}

/// 取出并清除 Ctrl-C 中断标记（没有前台任务时收到的 SIGINT）。
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// fork 之后、exec 之前调用：子进程使用默认的信号处理。
pub fn reset_for_child() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in JOB_CONTROL {
        // 子进程里无法上报，失败就保持原样
        let _ = unsafe { sigaction(signal, &action) };
    }
}

/// 在 fork 出的子进程里运行 `body`，返回它是否成功。
///
/// 信号处理是进程级的，测试放在独立进程里互不干扰。
#[cfg(test)]
pub(crate) fn in_child_process(body: impl FnOnce() -> bool) -> bool {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let passed = catch_unwind(AssertUnwindSafe(body)).unwrap_or(false);
            unsafe { libc::_exit(if passed { 0 } else { 1 }) }
        }
        Ok(ForkResult::Parent { child }) => {
            matches!(waitpid(child, None), Ok(WaitStatus::Exited(_, 0)))
        }
        Err(_) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;

    #[test]
    fn test_relay_records_child_events_and_uninstalls() {
        assert!(in_child_process(|| {
            let relay = SignalRelay::install().unwrap();
            assert!(matches!(SignalRelay::install(), Err(Errno::EBUSY)));

            raise(Signal::SIGCHLD).unwrap();
            assert!(take_child_event());
            assert!(!take_child_event());

            drop(relay);
            SignalRelay::install().is_ok()
        }));
    }

    #[test]
    fn test_interrupt_without_foreground_job() {
        assert!(in_child_process(|| {
            let _relay = SignalRelay::install().unwrap();
            set_foreground(None);
            assert!(!take_interrupt());
            raise(Signal::SIGINT).unwrap();
            take_interrupt() && !take_interrupt()
        }));
    }
}
