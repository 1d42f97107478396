//! Progress tracking and reporting, for the purpose of display to the user.

use crate::error::GoalError;
use crate::goal::ExitCode;
use std::io::Write;

/// Counts of goals in each state, as of the last worker pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateCounts {
    /// Goals created so far.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Goals with a running child process.
    pub running: usize,
}

impl StateCounts {
    pub fn done(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Trait for progress notifications.
pub trait Progress {
    /// Called once per worker pass.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a goal starts an external process.
    fn goal_started(&mut self, name: &str);

    /// Called with output of a goal's external process.
    fn goal_output(&mut self, name: &str, data: &[u8]);

    /// Called when a goal reaches a terminal state.
    fn goal_finished(&mut self, name: &str, result: ExitCode, error: Option<&GoalError>);

    /// Log a line of output without corrupting the progress display.
    fn log(&mut self, msg: &str);
}

/// Progress implementation that prints nothing.
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&mut self, _counts: &StateCounts) {}
    fn goal_started(&mut self, _name: &str) {}
    fn goal_output(&mut self, _name: &str, _data: &[u8]) {}
    fn goal_finished(&mut self, _name: &str, _result: ExitCode, _error: Option<&GoalError>) {}
    fn log(&mut self, _msg: &str) {}
}

/// Progress implementation for a plain console, without any overprinting.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to echo process output and per-pass counts.
    verbose: bool,
    /// Number of finished goals at the last printed update, used to avoid
    /// printing identical status lines.
    last_done: Option<usize>,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress {
            verbose,
            last_done: None,
        }
    }
}

impl Progress for ConsoleProgress {
    fn update(&mut self, counts: &StateCounts) {
        if !self.verbose || self.last_done == Some(counts.done()) {
            return;
        }
        self.last_done = Some(counts.done());
        let mut line = format!(
            "[{}] {}/{} done, ",
            progress_bar(counts, 40),
            counts.done(),
            counts.total
        );
        if counts.failed > 0 {
            line.push_str(&format!("{} failed, ", counts.failed));
        }
        line.push_str(&format!("{} running", counts.running));
        self.log(&line);
    }

    fn goal_started(&mut self, name: &str) {
        self.log(name);
    }

    fn goal_output(&mut self, _name: &str, data: &[u8]) {
        if self.verbose {
            // Output is best effort; a closed stdout must not fail the build.
            let _ = std::io::stdout().write_all(data);
        }
    }

    fn goal_finished(&mut self, name: &str, result: ExitCode, error: Option<&GoalError>) {
        match result {
            ExitCode::Busy | ExitCode::Success => {}
            ExitCode::Failed | ExitCode::NoSubstituters | ExitCode::IncompleteClosure => {
                self.log(&format!("failed: {}", name));
                if let Some(err) = error {
                    for line in err.msg.lines() {
                        self.log(&format!("  {}", line));
                    }
                }
            }
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Render a StateCounts as an ASCII progress bar.
fn progress_bar(counts: &StateCounts, bar_size: usize) -> String {
    let mut bar = String::with_capacity(bar_size);
    let total = counts.total;
    if total == 0 {
        return " ".repeat(bar_size);
    }
    let mut sum: usize = 0;
    for (count, ch) in [
        (counts.done(), '='),
        (counts.running, '-'),
        (total.saturating_sub(counts.done() + counts.running), ' '),
    ] {
        sum += count;
        let mut target_size = sum * bar_size / total;
        if count > 0 && target_size == bar.len() && target_size < bar_size {
            // Special case: for non-zero count, ensure we always get at least
            // one tick.
            target_size += 1;
        }
        while bar.len() < target_size {
            bar.push(ch);
        }
    }
    bar
}
