use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dwf_prepipe::errors::{PrepipeError, Result};
use dwf_prepipe::exec::{CommandRunner, ToolCommand, ToolOutput};

/// Scripted result of one invocation.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success { stdout: String },
    Exit { code: i32, stderr: String },
    Missing,
}

type Effect = Arc<dyn Fn(&ToolCommand) + Send + Sync>;

struct Rule {
    program: String,
    /// Only applies when some argument contains this text.
    arg_contains: Option<String>,
    outcome: Outcome,
}

#[derive(Default)]
struct State {
    calls: Vec<ToolCommand>,
    rules: Vec<Rule>,
    effects: Vec<(String, Effect)>,
}

/// A fake command runner that:
/// - records every command it is asked to run
/// - returns scripted outcomes (success with empty output by default)
/// - optionally runs a side effect, e.g. creating the file a tool would write.
///
/// Clones share the same recording.
#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<State>>,
    delay: Option<Duration>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl std::fmt::Debug for FakeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRunner")
            .field("calls", &self.lock().calls.len())
            .finish_non_exhaustive()
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rule(self, program: &str, arg_contains: Option<&str>, outcome: Outcome) -> Self {
        self.lock().rules.push(Rule {
            program: program.to_string(),
            arg_contains: arg_contains.map(str::to_string),
            outcome,
        });
        self
    }

    /// Every call to `program` exits with `code`.
    pub fn fail(self, program: &str, code: i32, stderr: &str) -> Self {
        self.rule(
            program,
            None,
            Outcome::Exit {
                code,
                stderr: stderr.to_string(),
            },
        )
    }

    /// Calls to `program` with an argument containing `needle` exit with `code`.
    pub fn fail_when(self, program: &str, needle: &str, code: i32) -> Self {
        self.rule(
            program,
            Some(needle),
            Outcome::Exit {
                code,
                stderr: format!("{program} failed"),
            },
        )
    }

    pub fn stdout(self, program: &str, stdout: &str) -> Self {
        self.rule(
            program,
            None,
            Outcome::Success {
                stdout: stdout.to_string(),
            },
        )
    }

    /// `program` cannot be launched.
    pub fn missing(self, program: &str) -> Self {
        self.rule(program, None, Outcome::Missing)
    }

    /// Run `effect` whenever `program` succeeds.
    pub fn effect(self, program: &str, effect: impl Fn(&ToolCommand) + Send + Sync + 'static) -> Self {
        self.lock()
            .effects
            .push((program.to_string(), Arc::new(effect)));
        self
    }

    /// Make every call take `delay` (tokio time, so paused clocks work).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        self.lock().calls.clone()
    }

    /// Programs in call order.
    pub fn programs(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.program.clone()).collect()
    }

    /// Argument lists of every call to `program`.
    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.program == program)
            .map(|c| c.arg_strings())
            .collect()
    }

    /// Most calls that were in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, cmd: &ToolCommand) -> (Outcome, Vec<Effect>) {
        let mut state = self.lock();
        state.calls.push(cmd.clone());
        let args = cmd.arg_strings();

        let outcome = state
            .rules
            .iter()
            .rev()
            .find(|r| {
                r.program == cmd.program
                    && r.arg_contains
                        .as_ref()
                        .is_none_or(|needle| args.iter().any(|a| a.contains(needle.as_str())))
            })
            .map(|r| r.outcome.clone())
            .unwrap_or(Outcome::Success {
                stdout: String::new(),
            });
        let effects = state
            .effects
            .iter()
            .filter(|(p, _)| *p == cmd.program)
            .map(|(_, e)| Arc::clone(e))
            .collect();
        (outcome, effects)
    }
}

impl CommandRunner for FakeRunner {
    fn run<'a>(
        &'a self,
        cmd: &'a ToolCommand,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send + 'a>> {
        Box::pin(async move {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let (outcome, effects) = self.outcome_for(cmd);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            match outcome {
                Outcome::Success { stdout } => {
                    for effect in effects {
                        effect(cmd);
                    }
                    Ok(ToolOutput {
                        code: 0,
                        stdout,
                        stderr: String::new(),
                    })
                }
                Outcome::Exit { code, stderr } => Ok(ToolOutput {
                    code,
                    stdout: String::new(),
                    stderr,
                }),
                Outcome::Missing => Err(PrepipeError::ToolMissing {
                    tool: cmd.program.clone(),
                    reason: "No such file or directory (os error 2)".to_string(),
                }),
            }
        })
    }
}
