//! Per-iteration observer hooks for logging, monitoring, or early display.

use dyn_clone::DynClone;

use crate::options::Options;
use crate::{E, I};

/// Snapshot of solver progress handed to a [`Callback`].
#[derive(Debug, Clone, Default)]
pub struct Progress {
    /// Simplex iterations (or interior-point iterations on the QP path).
    pub iterations: I,
    /// Simplex phase (1 or 2), zero outside the simplex.
    pub phase: I,
    /// Current (dual) objective value.
    pub objective: E,
    /// Number of primal infeasibilities.
    pub num_primal_infeasibility: I,
    /// Sum of dual infeasibilities.
    pub sum_dual_infeasibility: E,
    /// MIP nodes explored, zero outside the search.
    pub nodes: I,
    /// Best known incumbent objective, if any.
    pub incumbent: Option<E>,
    /// Best known dual bound for the search.
    pub dual_bound: Option<E>,
}

/// Hook invoked at iteration, rebuild, and search-display points.
pub trait Callback: DynClone {
    /// Creates a new callback from solver options.
    fn new(options: &Options) -> Self
    where
        Self: Sized;

    /// Called with the current progress snapshot.
    fn call(&mut self, progress: &Progress);
}

dyn_clone::clone_trait_object!(Callback);

/// A callback that does nothing. Use when no per-iteration output is needed.
#[derive(Clone)]
pub struct NoOpCallback {}

impl Callback for NoOpCallback {
    fn new(_options: &Options) -> Self {
        Self {}
    }

    fn call(&mut self, _progress: &Progress) {
        // Do nothing
    }
}

/// Prints one formatted line per report to stdout.
#[derive(Clone)]
pub struct IterationOutput {
    enabled: bool,
}

impl Callback for IterationOutput {
    fn new(options: &Options) -> Self {
        Self {
            enabled: options.output_flag,
        }
    }

    fn call(&mut self, progress: &Progress) {
        if !self.enabled {
            return;
        }
        let txt = match (progress.incumbent, progress.dual_bound) {
            (Some(incumbent), Some(bound)) => format!(
                "| {:8} | {:8} | {:<14.8e} | {:<14.8e} |",
                progress.nodes, progress.iterations, bound, incumbent,
            ),
            _ => format!(
                "| ph{:1} | {:8} | {:<14.8e} | {:4} | {:<8.2e} |",
                progress.phase,
                progress.iterations,
                progress.objective,
                progress.num_primal_infeasibility,
                progress.sum_dual_infeasibility,
            ),
        };
        println!("{}", txt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_callback_ignores_progress() {
        let options = Options::default();
        let mut callback = NoOpCallback::new(&options);
        callback.call(&Progress::default());
    }

    #[test]
    fn callbacks_are_cloneable_boxed() {
        let options = Options::default();
        let boxed: Box<dyn Callback> = Box::new(IterationOutput::new(&options));
        let mut copy = boxed.clone();
        copy.call(&Progress {
            iterations: 3,
            phase: 2,
            objective: 1.5,
            ..Progress::default()
        });
    }
}
