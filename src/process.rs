//! Process control primitives: fork + exec the target, reap children.
//!
//! The supervisor only talks to the `ProcessControl` trait, so its loop can
//! run against the real kernel (`Kernel`) or a scripted fake in tests.

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The program init keeps alive, prepared for exec.
///
/// All C strings are built once up front; the child branch of `fork` must
/// not allocate before it execs.
#[derive(Debug)]
pub struct Target {
    program: PathBuf,
    path: CString,
    argv: Vec<CString>,
    exec_failed_prefix: Vec<u8>,
}

/// The target path cannot be passed to exec.
#[derive(Debug)]
pub struct TargetError {
    pub program: PathBuf,
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "target program path {} contains a NUL byte",
            self.program.display()
        )
    }
}

impl std::error::Error for TargetError {}

impl Target {
    /// Build a target invoked as `argv = [program]`.
    pub fn new(program: &Path) -> Result<Target, TargetError> {
        let path = CString::new(program.as_os_str().as_bytes()).map_err(|_| TargetError {
            program: program.to_path_buf(),
        })?;
        let exec_failed_prefix = format!("init: exec {} failed: ", program.display()).into_bytes();
        Ok(Target {
            program: program.to_path_buf(),
            argv: vec![path.clone()],
            path,
            exec_failed_prefix,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Argument vector passed to the program (argv[0] is its own path).
    #[allow(dead_code)]
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled { signal: Signal, core_dumped: bool },
    /// The kernel has no such child any more (ECHILD).
    Vanished,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exited with status {code}"),
            Termination::Signaled {
                signal,
                core_dumped,
            } => {
                write!(f, "killed by {}", signal.as_str())?;
                if *core_dumped {
                    write!(f, " (core dumped)")?;
                }
                Ok(())
            }
            Termination::Vanished => write!(f, "vanished"),
        }
    }
}

/// A child collected by `ProcessControl::reap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    pub termination: Termination,
}

impl Reaped {
    /// Map a wait status to a reaped child. Non-terminal statuses give `None`.
    pub fn from_status(status: WaitStatus) -> Option<Reaped> {
        match status {
            WaitStatus::Exited(pid, code) => Some(Reaped {
                pid,
                termination: Termination::Exited(code),
            }),
            WaitStatus::Signaled(pid, signal, core_dumped) => Some(Reaped {
                pid,
                termination: Termination::Signaled {
                    signal,
                    core_dumped,
                },
            }),
            _ => None,
        }
    }
}

/// Process creation failed in the parent; no child exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    Fork { errno: Errno },
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnError::Fork { errno } => write!(f, "fork failed: {}", errno.desc()),
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpawnError::Fork { errno } => Some(errno),
        }
    }
}

/// The kernel operations the supervisor loop depends on.
pub trait ProcessControl {
    /// Start a new child running `target`. Returns the child's pid in the
    /// parent; exec failures only affect the child.
    fn spawn(&mut self, target: &Target) -> Result<Pid, SpawnError>;

    /// Block until any child terminates and reap it.
    fn reap(&mut self) -> Result<Reaped, Errno>;

    /// Sleep between spawn attempts.
    fn pause(&mut self, delay: Duration);
}

/// `ProcessControl` backed by fork/execv/waitpid.
#[derive(Debug, Default)]
pub struct Kernel;

impl ProcessControl for Kernel {
    fn spawn(&mut self, target: &Target) -> Result<Pid, SpawnError> {
        let mut argv: Vec<*const libc::c_char> = target.argv.iter().map(|a| a.as_ptr()).collect();
        argv.push(std::ptr::null());

        // SAFETY: the child branch only calls execv, write and _exit, all of
        // which are async-signal-safe, and touches no state shared with other
        // threads.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child),
            Ok(ForkResult::Child) => exec_child(target, &argv),
            Err(errno) => Err(SpawnError::Fork { errno }),
        }
    }

    fn reap(&mut self) -> Result<Reaped, Errno> {
        loop {
            if let Some(reaped) = Reaped::from_status(waitpid(Pid::from_raw(-1), None)?) {
                return Ok(reaped);
            }
        }
    }

    fn pause(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Child side of `spawn`. Never returns into the supervisor loop.
fn exec_child(target: &Target, argv: &[*const libc::c_char]) -> ! {
    // SAFETY: path and argv are NUL-terminated and outlive the call.
    unsafe {
        libc::execv(target.path.as_ptr(), argv.as_ptr());
    }
    let errno = Errno::last();
    let stderr = std::io::stderr();
    let _ = nix::unistd::write(&stderr, &target.exec_failed_prefix);
    let _ = nix::unistd::write(&stderr, errno.desc().as_bytes());
    let _ = nix::unistd::write(&stderr, b"\n");
    // SAFETY: _exit skips atexit handlers and stdio flushing that belong to
    // the parent.
    unsafe { libc::_exit(127) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_argv_is_program_path_only() {
        let target = Target::new(Path::new("/bin/lsh")).unwrap();
        assert_eq!(target.program(), Path::new("/bin/lsh"));
        assert_eq!(target.argv().len(), 1);
        assert_eq!(target.argv()[0].to_bytes(), b"/bin/lsh");
        assert_eq!(
            String::from_utf8(target.exec_failed_prefix.clone()).unwrap(),
            "init: exec /bin/lsh failed: "
        );
    }

    #[test]
    fn test_target_rejects_nul_byte() {
        let program = PathBuf::from(std::ffi::OsStr::from_bytes(b"/bin/l\0sh"));
        let err = Target::new(&program).unwrap_err();
        assert!(err.to_string().contains("NUL"));
    }

    #[test]
    fn test_reaped_from_exit_status() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            Reaped::from_status(WaitStatus::Exited(pid, 3)),
            Some(Reaped {
                pid,
                termination: Termination::Exited(3),
            })
        );
    }

    #[test]
    fn test_reaped_from_signal_status() {
        let pid = Pid::from_raw(42);
        let reaped = Reaped::from_status(WaitStatus::Signaled(pid, Signal::SIGSEGV, true)).unwrap();
        assert_eq!(
            reaped.termination,
            Termination::Signaled {
                signal: Signal::SIGSEGV,
                core_dumped: true,
            }
        );
        assert_eq!(
            reaped.termination.to_string(),
            "killed by SIGSEGV (core dumped)"
        );
    }

    #[test]
    fn test_non_terminal_status_is_ignored() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            Reaped::from_status(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            None
        );
        assert_eq!(Reaped::from_status(WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(Termination::Exited(0).to_string(), "exited with status 0");
        assert_eq!(
            Termination::Signaled {
                signal: Signal::SIGKILL,
                core_dumped: false,
            }
            .to_string(),
            "killed by SIGKILL"
        );
        assert_eq!(Termination::Vanished.to_string(), "vanished");
    }

    #[test]
    fn test_spawn_error_display() {
        let err = SpawnError::Fork {
            errno: Errno::EAGAIN,
        };
        assert!(err.to_string().starts_with("fork failed: "));
    }
}
