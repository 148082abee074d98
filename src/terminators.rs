//! Solve-limit enforcement.
//!
//! The engines poll a [`Terminator`] at their cancellation points: the end
//! of each simplex iteration, after each relaxation solve in the search,
//! after each interior-point step, and after each PAMI major iteration. A
//! firing terminator stops the solve with the best known state.
//!
//! [`SolveLimits`] is the solver's own limit set, built from [`Options`]:
//! a wall-clock deadline, the iteration budget, and an optional shared
//! [`InterruptFlag`]. Nested solves with their own budgets (strong-branching
//! probes, node relaxations, sub-MIPs) use a bare [`IterationTerminator`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::options::Options;
use crate::{E, I, INFTY_THRESHOLD, ModelStatus};

/// Cancellation points fire once per pivot; on small bases reading the
/// clock costs more than the pivot itself, so the deadline is only compared
/// every this many polls.
const TIME_CHECK_INTERVAL: I = 64;

pub trait Terminator {
    /// Called once when the solve starts; deadlines are anchored here.
    fn initialize(&mut self) {}

    /// Returns the status to stop with, or `None` to keep going.
    fn terminate(&mut self, iterations: I) -> Option<ModelStatus>;
}

/// Terminator that triggers once an iteration budget is exhausted.
pub struct IterationTerminator {
    max_iterations: I,
}

impl IterationTerminator {
    pub fn new(max_iterations: I) -> Self {
        Self { max_iterations }
    }
}

impl Terminator for IterationTerminator {
    fn terminate(&mut self, iterations: I) -> Option<ModelStatus> {
        if iterations >= self.max_iterations {
            Some(ModelStatus::IterationLimit)
        } else {
            None
        }
    }
}

/// Shared cancellation signal.
///
/// The facade hands out clones of the flag; raising it from any thread (or
/// from a Ctrl-C handler) stops the solve at its next cancellation point
/// with [`ModelStatus::Interrupted`].
#[derive(Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Lowers the signal, so the owning facade can run again.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Routes Ctrl-C (SIGINT) to this flag.
    ///
    /// Installing the process-wide handler can fail, most commonly because
    /// a handler is already registered; the error is returned for the
    /// caller to report rather than escalated.
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let raised = self.raised.clone();
        ctrlc::set_handler(move || raised.store(true, Ordering::SeqCst))
    }
}

/// The limit set of one solve: interrupt, iteration budget, and wall-clock
/// deadline, in that order of priority.
pub struct SolveLimits {
    time_limit: E,
    iteration_limit: I,
    interrupt: Option<InterruptFlag>,
    deadline: Option<Instant>,
    polls: I,
}

impl SolveLimits {
    pub fn from_options(options: &Options) -> Self {
        Self {
            time_limit: options.time_limit,
            iteration_limit: options.simplex_iteration_limit,
            interrupt: None,
            deadline: None,
            polls: 0,
        }
    }

    /// Attaches a shared interrupt signal.
    #[must_use]
    pub fn with_interrupt(mut self, flag: InterruptFlag) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn past_deadline(&mut self) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        // First poll always reads the clock, then one in every
        // TIME_CHECK_INTERVAL.
        self.polls += 1;
        if self.polls % TIME_CHECK_INTERVAL != 1 {
            return false;
        }
        Instant::now() >= deadline
    }
}

impl Terminator for SolveLimits {
    fn initialize(&mut self) {
        self.polls = 0;
        self.deadline = if self.time_limit < INFTY_THRESHOLD {
            // A limit of a few decades is as good as none, and keeps the
            // Duration conversion well-defined.
            let seconds = self.time_limit.clamp(0.0, 1e9);
            Instant::now().checked_add(Duration::from_secs_f64(seconds))
        } else {
            None
        };
    }

    fn terminate(&mut self, iterations: I) -> Option<ModelStatus> {
        if let Some(flag) = &self.interrupt {
            if flag.is_interrupted() {
                return Some(ModelStatus::Interrupted);
            }
        }
        if iterations >= self.iteration_limit {
            return Some(ModelStatus::IterationLimit);
        }
        if self.past_deadline() {
            return Some(ModelStatus::TimeLimit);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    mod platform {
        pub fn send_sigint() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = std::process::id() as i32;
            signal::kill(Pid::from_raw(pid), Signal::SIGINT).expect("Failed to send SIGINT");
        }
    }

    #[cfg(windows)]
    mod platform {
        pub fn send_sigint() {
            use windows_sys::Win32::System::Console::{CTRL_C_EVENT, GenerateConsoleCtrlEvent};

            unsafe {
                GenerateConsoleCtrlEvent(CTRL_C_EVENT, 0);
            }
        }
    }

    fn limits(time_limit: E, iteration_limit: I) -> SolveLimits {
        let mut options = Options::default();
        options.time_limit = time_limit;
        options.simplex_iteration_limit = iteration_limit;
        let mut limits = SolveLimits::from_options(&options);
        limits.initialize();
        limits
    }

    #[test]
    fn iteration_terminator_fires_at_budget() {
        let mut terminator = IterationTerminator::new(10);
        assert_eq!(terminator.terminate(9), None);
        assert_eq!(terminator.terminate(10), Some(ModelStatus::IterationLimit));
    }

    #[test]
    fn disabled_limits_never_fire() {
        let mut limits = limits(crate::INFTY, 1_000_000);
        for poll in 0..1000 {
            assert_eq!(limits.terminate(poll), None);
        }
    }

    #[test]
    fn expired_deadline_fires_on_the_first_poll() {
        let mut limits = limits(0.0, 1_000_000);
        assert_eq!(limits.terminate(0), Some(ModelStatus::TimeLimit));
    }

    #[test]
    fn deadline_polls_read_the_clock_sparsely() {
        let mut limits = limits(1e4, 1_000_000);
        // Pretend the deadline already passed; only every
        // TIME_CHECK_INTERVAL-th poll may notice.
        limits.deadline = Some(Instant::now() - Duration::from_secs(1));
        assert_eq!(limits.terminate(0), Some(ModelStatus::TimeLimit));
        let mut fired = 0;
        for poll in 0..(2 * TIME_CHECK_INTERVAL) {
            if limits.terminate(poll).is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 2);
    }

    #[test]
    fn interrupt_outranks_the_iteration_budget() {
        let mut limits = limits(crate::INFTY, 5);
        let flag = InterruptFlag::new();
        limits = limits.with_interrupt(flag.clone());

        assert_eq!(limits.terminate(0), None);
        flag.interrupt();
        assert_eq!(limits.terminate(100), Some(ModelStatus::Interrupted));
        flag.clear();
        assert_eq!(limits.terminate(100), Some(ModelStatus::IterationLimit));
    }

    #[test]
    fn ctrlc_raises_the_shared_flag() {
        let flag = InterruptFlag::new();
        flag.install_ctrlc().unwrap();

        // The process-wide handler is single-install; a second registration
        // reports instead of aborting.
        assert!(InterruptFlag::new().install_ctrlc().is_err());

        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(200));
            platform::send_sigint();
        });

        let mut limits = limits(crate::INFTY, 1_000_000).with_interrupt(flag);
        loop {
            if let Some(status) = limits.terminate(0) {
                assert_eq!(status, ModelStatus::Interrupted);
                break;
            }
        }
    }
}
