//! Parallel fan-out scheduler
//!
//! Independent polyglot blocks at the same statement level run
//! concurrently: the evaluator hands this module a DAG of prepared jobs,
//! in-degree-zero nodes launch immediately (one OS thread per in-flight
//! subprocess), completions release their dependents, and everything
//! joins before results surface in source order.
//!
//! Values never enter this module: marshalling already happened on the
//! evaluator thread, and jobs plus outputs are plain `Send` data.

use crate::polyglot::dispatch::Dispatcher;
use crate::polyglot::exec::GuestOutput;
use crate::polyglot::langs::PreparedProgram;
use naab_core::CoreError;
use std::collections::HashMap;
use std::sync::mpsc;
use tracing::debug;

/// One node of the fan-out DAG.
pub struct FanOutJob {
    /// The name the result will be bound to (for logs only).
    pub name: String,
    pub prepared: PreparedProgram,
    /// Indices of jobs that must complete before this one launches.
    pub deps: Vec<usize>,
}

/// Run a batch of jobs respecting their dependency edges. The returned
/// vector is in input (source) order; each entry is the guest output or
/// the execution error for that job. A failed dependency does not stop
/// dependents: they still run, because their marshalled inputs were
/// fixed before the batch started.
pub fn run_fanout(
    dispatcher: &Dispatcher,
    jobs: Vec<FanOutJob>,
) -> Vec<Result<GuestOutput, CoreError>> {
    let total = jobs.len();
    let mut results: Vec<Option<Result<GuestOutput, CoreError>>> =
        (0..total).map(|_| None).collect();
    if total == 0 {
        return Vec::new();
    }

    // Build in-degrees and reverse edges.
    let mut in_degree = vec![0usize; total];
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for (index, job) in jobs.iter().enumerate() {
        for &dep in &job.deps {
            in_degree[index] += 1;
            dependents.entry(dep).or_default().push(index);
        }
    }

    let mut pending: Vec<Option<FanOutJob>> = jobs.into_iter().map(Some).collect();
    let (sender, receiver) = mpsc::channel::<(usize, Result<GuestOutput, CoreError>)>();

    std::thread::scope(|scope| {
        let mut launched = 0usize;
        let mut launch = |index: usize, pending: &mut Vec<Option<FanOutJob>>| {
            let job = pending[index].take().expect("job launched twice");
            debug!(name = %job.name, index, "fan-out launch");
            let sender = sender.clone();
            scope.spawn(move || {
                let result = dispatcher.execute(&job.prepared);
                // The receiver only disappears if the scope is
                // unwinding; nothing to do about a failed send.
                let _ = sender.send((index, result));
            });
        };

        for index in 0..total {
            if in_degree[index] == 0 {
                launch(index, &mut pending);
                launched += 1;
            }
        }

        let mut completed = 0usize;
        while completed < total {
            let (index, result) = receiver.recv().expect("fan-out channel closed early");
            results[index] = Some(result);
            completed += 1;
            if let Some(children) = dependents.get(&index) {
                for &child in children {
                    in_degree[child] -= 1;
                    if in_degree[child] == 0 {
                        launch(child, &mut pending);
                        launched += 1;
                    }
                }
            }
        }
        debug!(total, launched, "fan-out joined");
    });

    results
        .into_iter()
        .map(|r| r.expect("every job completed"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyglot::dispatch::PolyglotConfig;
    use crate::polyglot::langs::Language;
    use std::time::Duration;

    fn shell_job(name: &str, body: &str, deps: Vec<usize>) -> FanOutJob {
        FanOutJob {
            name: name.to_string(),
            prepared: PreparedProgram {
                language: Language::Shell,
                source: body.to_string(),
                exec_timeout: Duration::from_secs(10),
                compile_timeout: Duration::from_secs(10),
                sidechannel: None,
            },
            deps,
        }
    }

    #[test]
    fn test_independent_jobs_all_complete() {
        let dispatcher = Dispatcher::new(PolyglotConfig::default());
        let jobs = vec![
            shell_job("a", "echo one\n", vec![]),
            shell_job("b", "echo two\n", vec![]),
            shell_job("c", "echo three\n", vec![]),
        ];
        let results = run_fanout(&dispatcher, jobs);
        assert_eq!(results.len(), 3);
        let outs: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().stdout.trim().to_string())
            .collect();
        // Source order is preserved regardless of completion order.
        assert_eq!(outs, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_independent_jobs_overlap() {
        // Two 300ms sleeps in parallel finish well under 600ms.
        let dispatcher = Dispatcher::new(PolyglotConfig::default());
        let jobs = vec![
            shell_job("a", "sleep 0.3\necho a\n", vec![]),
            shell_job("b", "sleep 0.3\necho b\n", vec![]),
        ];
        let start = std::time::Instant::now();
        let results = run_fanout(&dispatcher, jobs);
        let elapsed = start.elapsed();
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(
            elapsed < Duration::from_millis(550),
            "jobs did not overlap: {:?}",
            elapsed
        );
    }

    #[test]
    fn test_dependency_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let dispatcher = Dispatcher::new(PolyglotConfig::default());
        let jobs = vec![
            shell_job(
                "a",
                &format!("sleep 0.2\ntouch {}\n", marker.display()),
                vec![],
            ),
            shell_job(
                "b",
                &format!("test -f {} && echo present || echo absent\n", marker.display()),
                vec![0],
            ),
        ];
        let results = run_fanout(&dispatcher, jobs);
        assert_eq!(results[1].as_ref().unwrap().stdout.trim(), "present");
    }

    #[test]
    fn test_empty_batch() {
        let dispatcher = Dispatcher::new(PolyglotConfig::default());
        assert!(run_fanout(&dispatcher, Vec::new()).is_empty());
    }
}
