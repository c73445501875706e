/// Supervisor loop: keep exactly one instance of the target program alive.
///
/// Spawn, wait for that child, log the termination, spawn again. Exit status
/// never changes what happens next. Any other child reaped while waiting is
/// an orphan re-parented to us and is simply collected.
use crate::backoff::SpawnBackoff;
use crate::process::{ProcessControl, Reaped, Target, Termination};
use nix::errno::Errno;
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

/// Counters kept across the lifetime of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub spawns: u64,
    pub terminations: u64,
    pub orphans_reaped: u64,
    pub spawn_failures: u64,
}

pub struct Supervisor<P: ProcessControl> {
    control: P,
    target: Target,
    backoff: SpawnBackoff,
    current: Option<Pid>,
    stats: SupervisorStats,
}

impl<P: ProcessControl> Supervisor<P> {
    pub fn new(control: P, target: Target, backoff: SpawnBackoff) -> Self {
        Self {
            control,
            target,
            backoff,
            current: None,
            stats: SupervisorStats::default(),
        }
    }

    #[allow(dead_code)]
    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Pid of the live supervised child, if one has been spawned.
    #[allow(dead_code)]
    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    /// Spawn the first child. No-op if one is already live.
    pub fn start(&mut self) -> Pid {
        match self.current {
            Some(pid) => pid,
            None => self.spawn_child(),
        }
    }

    /// One loop iteration: wait for the live child, report, spawn a
    /// replacement. Returns how the old child ended.
    pub fn step(&mut self) -> Termination {
        let child = self.start();
        let termination = self.wait_for(child);
        self.current = None;
        self.stats.terminations += 1;
        warn!(
            pid = child.as_raw(),
            program = %self.target.program().display(),
            status = %termination,
            terminations = self.stats.terminations,
            orphans_reaped = self.stats.orphans_reaped,
            "supervised program terminated"
        );
        self.spawn_child();
        termination
    }

    /// Run forever. PID 1 has no reachable exit from here.
    pub fn run(mut self) -> ! {
        self.start();
        loop {
            self.step();
        }
    }

    /// Fork the target, retrying with backoff until the kernel gives us a
    /// process.
    fn spawn_child(&mut self) -> Pid {
        loop {
            match self.control.spawn(&self.target) {
                Ok(pid) => {
                    self.backoff.reset();
                    self.stats.spawns += 1;
                    self.current = Some(pid);
                    info!(
                        pid = pid.as_raw(),
                        program = %self.target.program().display(),
                        spawns = self.stats.spawns,
                        spawn_failures = self.stats.spawn_failures,
                        "supervised program started"
                    );
                    return pid;
                }
                Err(e) => {
                    self.stats.spawn_failures += 1;
                    let delay = self.backoff.next_delay();
                    error!(
                        error = %e,
                        attempt = self.backoff.consecutive(),
                        delay_ms = delay.as_millis() as u64,
                        "failed to spawn supervised program, backing off"
                    );
                    self.control.pause(delay);
                }
            }
        }
    }

    /// Reap children until `child` is among them.
    fn wait_for(&mut self, child: Pid) -> Termination {
        loop {
            match self.control.reap() {
                Ok(Reaped { pid, termination }) if pid == child => return termination,
                Ok(Reaped { pid, termination }) => {
                    self.stats.orphans_reaped += 1;
                    debug!(pid = pid.as_raw(), status = %termination, "reaped orphan");
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    warn!(pid = child.as_raw(), "supervised child no longer exists");
                    return Termination::Vanished;
                }
                Err(errno) => {
                    error!(error = %errno, pid = child.as_raw(), "wait failed, retrying");
                }
            }
        }
    }
}
