//! Turns a language id plus source text into an [`ExecutionResult`].
//!
//! Every request walks a small state machine:
//!
//! ```text
//! Pending -> Validating -> Interpreting ---------------> Completed
//!                       \-> Compiling -> Running ------> Completed
//!            (any active state) -> TimedOut | Failed
//! ```
//!
//! One deadline covers the whole request, compilation included. Nothing in
//! here returns an error to the caller: spawn and I/O failures become a
//! `failed` result.

pub mod pipeline;
pub mod process;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use coderoom_protocol::{ExecutionResult, Language, NO_EXIT_CODE, RunStatus};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ProcessError;
use crate::output::combine;
pub use pipeline::{CommandTemplate, Pipeline, SourceVia, Toolchains, WorkPaths};
pub use process::{ProcessOutcome, ProcessSpec, run_with_deadline};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const WORKDIR_PREFIX: &str = "coderoom-";
const BINARY_NAME: &str = "program";

#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub timeout: Duration,
    /// Capture cap per stream.
    pub max_output_bytes: usize,
    /// Parent of the per-request work directories.
    pub scratch_dir: PathBuf,
    pub toolchains: Toolchains,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            scratch_dir: std::env::temp_dir(),
            toolchains: Toolchains::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Validating,
    Interpreting,
    Compiling,
    Running,
    Completed,
    TimedOut,
    Failed,
}

struct RunTracker<'a> {
    request_id: Uuid,
    language: &'a str,
    state: RunState,
}

impl<'a> RunTracker<'a> {
    fn new(language: &'a str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            language,
            state: RunState::Pending,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(
            request_id = %self.request_id,
            language = self.language,
            from = ?self.state,
            to = ?next,
            "run state"
        );
        self.state = next;
    }
}

/// Runs execution requests. Cheap to clone; each request is independent.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<ExecConfig>,
}

impl Orchestrator {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Runnable language ids, comma separated, in catalog order.
    pub fn supported_languages(&self) -> String {
        self.config
            .toolchains
            .languages()
            .map(Language::id)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub async fn execute(&self, language: &str, source: &str) -> ExecutionResult {
        let mut run = RunTracker::new(language);
        run.advance(RunState::Validating);

        let pipeline = language
            .parse::<Language>()
            .ok()
            .and_then(|lang| self.config.toolchains.get(lang));
        let Some(pipeline) = pipeline else {
            info!(request_id = %run.request_id, language, "unsupported language requested");
            run.advance(RunState::Completed);
            return ExecutionResult {
                output: format!(
                    "Unsupported language: {language}. Supported languages: {}",
                    self.supported_languages()
                ),
                exit_code: NO_EXIT_CODE,
                error: true,
                status: RunStatus::Unsupported,
            };
        };

        let deadline = Instant::now() + self.config.timeout;
        let result = match pipeline {
            Pipeline::Interpret {
                program,
                args,
                source_via,
            } => {
                run.advance(RunState::Interpreting);
                let spec = Pipeline::interpret_spec(program, args, *source_via, source);
                match run_with_deadline(&spec, deadline, self.config.max_output_bytes).await {
                    Ok(outcome) => self.finish(&mut run, outcome),
                    Err(e) => self.failed(&mut run, e),
                }
            }
            Pipeline::CompileThenRun {
                source_file,
                compile,
                run: run_template,
            } => {
                self.compile_then_run(&mut run, source_file, compile, run_template, source, deadline)
                    .await
            }
        };

        debug!(
            request_id = %run.request_id,
            language,
            status = ?result.status,
            exit_code = result.exit_code,
            "execution finished"
        );
        result
    }

    async fn compile_then_run(
        &self,
        run: &mut RunTracker<'_>,
        source_file: &str,
        compile: &CommandTemplate,
        run_template: &CommandTemplate,
        source: &str,
        deadline: Instant,
    ) -> ExecutionResult {
        run.advance(RunState::Compiling);

        // Removed on drop for every early return below.
        let workdir = match tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(&self.config.scratch_dir)
        {
            Ok(dir) => dir,
            Err(e) => return self.failed(run, e.into()),
        };
        let source_path = workdir.path().join(source_file);
        let binary_path = workdir.path().join(BINARY_NAME);
        if let Err(e) = tokio::fs::write(&source_path, source).await {
            return self.failed(run, e.into());
        }
        let paths = WorkPaths {
            dir: workdir.path(),
            source: &source_path,
            binary: &binary_path,
        };

        let cap = self.config.max_output_bytes;
        let compiled =
            match run_with_deadline(&Pipeline::compile_spec(compile, &paths), deadline, cap).await
            {
                Ok(outcome) => outcome,
                Err(e) => return self.failed(run, e),
            };

        let result = if compiled.timed_out {
            self.finish(run, compiled)
        } else if !compiled.success() {
            run.advance(RunState::Failed);
            let exit_code = compiled.exit_code.unwrap_or(NO_EXIT_CODE);
            let diagnostics = if compiled.stderr.is_empty() {
                &compiled.stdout
            } else {
                &compiled.stderr
            };
            ExecutionResult {
                output: combine(
                    &format!("Compilation failed with exit code {exit_code}"),
                    diagnostics,
                ),
                exit_code,
                error: true,
                status: RunStatus::CompileFailed,
            }
        } else {
            run.advance(RunState::Running);
            match run_with_deadline(&Pipeline::run_spec(run_template, &paths), deadline, cap).await
            {
                Ok(outcome) => self.finish(run, outcome),
                Err(e) => self.failed(run, e),
            }
        };

        let dir = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            warn!(request_id = %run.request_id, dir = %dir.display(), error = %e, "failed to remove work directory");
        }
        result
    }

    fn finish(&self, run: &mut RunTracker<'_>, outcome: ProcessOutcome) -> ExecutionResult {
        let mut output = combine(&outcome.stdout, &outcome.stderr);
        if outcome.timed_out {
            run.advance(RunState::TimedOut);
            output.push_str(&format!(
                "\n[Execution timed out after {} seconds]",
                format_secs(self.config.timeout)
            ));
            return ExecutionResult {
                output,
                exit_code: NO_EXIT_CODE,
                error: true,
                status: RunStatus::TimedOut,
            };
        }

        run.advance(RunState::Completed);
        let exit_code = outcome.exit_code.unwrap_or(NO_EXIT_CODE);
        ExecutionResult {
            output,
            exit_code,
            error: exit_code != 0,
            status: RunStatus::Completed,
        }
    }

    fn failed(&self, run: &mut RunTracker<'_>, err: ProcessError) -> ExecutionResult {
        warn!(request_id = %run.request_id, language = run.language, error = %err, "execution failed");
        run.advance(RunState::Failed);
        ExecutionResult {
            output: format!("Execution error: {err}"),
            exit_code: NO_EXIT_CODE,
            error: true,
            status: RunStatus::Failed,
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(ExecConfig::default())
    }
}

fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.1}", d.as_secs_f64())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_toolchains() -> Toolchains {
        let mut toolchains = Toolchains::empty();
        toolchains.set(
            Language::Shell,
            Pipeline::interpret("sh", &["-c", "{source}"], SourceVia::Argument),
        );
        toolchains.set(
            Language::C,
            Pipeline::compile_then_run(
                "main.sh",
                CommandTemplate::new(
                    "sh",
                    &[
                        "-c",
                        "if grep -q SYNTAX_ERROR {source}; then echo 'main.sh:1: bad' >&2; exit 2; fi; cp {source} {binary}",
                    ],
                ),
                CommandTemplate::new("sh", &["{binary}"]),
            ),
        );
        toolchains
    }

    fn orchestrator(scratch: &std::path::Path, timeout: Duration) -> Orchestrator {
        Orchestrator::new(ExecConfig {
            timeout,
            max_output_bytes: 4096,
            scratch_dir: scratch.to_path_buf(),
            toolchains: sh_toolchains(),
        })
    }

    #[tokio::test]
    async fn unknown_and_markup_languages_are_unsupported() {
        let scratch = tempfile::tempdir().expect("create tempdir");
        let orch = orchestrator(scratch.path(), Duration::from_secs(5));
        for lang in ["cobol", "html"] {
            let result = orch.execute(lang, "x").await;
            assert_eq!(result.status, RunStatus::Unsupported);
            assert!(result.error);
            assert_eq!(result.exit_code, NO_EXIT_CODE);
            assert_eq!(
                result.output,
                format!("Unsupported language: {lang}. Supported languages: c, shell")
            );
        }
    }

    #[tokio::test]
    async fn interpreted_run_combines_streams() {
        let scratch = tempfile::tempdir().expect("create tempdir");
        let orch = orchestrator(scratch.path(), Duration::from_secs(5));
        let result = orch.execute("shell", "echo hi; echo oops >&2; exit 4").await;
        assert_eq!(result.output, "hi\n\nError: oops\n");
        assert_eq!(result.exit_code, 4);
        assert!(result.error);
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn compile_failure_skips_run() {
        let scratch = tempfile::tempdir().expect("create tempdir");
        let orch = orchestrator(scratch.path(), Duration::from_secs(5));
        let result = orch.execute("c", "echo should-not-run # SYNTAX_ERROR").await;
        assert_eq!(result.status, RunStatus::CompileFailed);
        assert_eq!(result.exit_code, 2);
        assert!(result.error);
        assert_eq!(
            result.output,
            "Compilation failed with exit code 2\nError: main.sh:1: bad\n"
        );
        assert!(!result.output.contains("should-not-run\n"));
    }

    #[tokio::test]
    async fn compiled_program_runs_and_workdir_is_removed() {
        let scratch = tempfile::tempdir().expect("create tempdir");
        let orch = orchestrator(scratch.path(), Duration::from_secs(5));
        let result = orch.execute("c", "echo compiled ok").await;
        assert_eq!(result.output, "compiled ok\n");
        assert_eq!(result.exit_code, 0);
        assert!(!result.error);
        assert_eq!(std::fs::read_dir(scratch.path()).expect("read scratch dir").count(), 0);
    }

    #[tokio::test]
    async fn timeout_reports_partial_output() {
        let scratch = tempfile::tempdir().expect("create tempdir");
        let orch = orchestrator(scratch.path(), Duration::from_millis(500));
        let result = orch.execute("shell", "echo partial; sleep 30").await;
        assert_eq!(result.status, RunStatus::TimedOut);
        assert_eq!(result.exit_code, NO_EXIT_CODE);
        assert!(result.error);
        assert_eq!(
            result.output,
            "partial\n\n[Execution timed out after 0.5 seconds]"
        );
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_failed_result() {
        let scratch = tempfile::tempdir().expect("create tempdir");
        let mut config = ExecConfig {
            scratch_dir: scratch.path().to_path_buf(),
            toolchains: sh_toolchains(),
            ..ExecConfig::default()
        };
        config
            .toolchains
            .override_program(Language::Shell, "coderoom-no-such-shell");
        let result = Orchestrator::new(config).execute("shell", "true").await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.output.starts_with("Execution error: "));
        assert_eq!(result.exit_code, NO_EXIT_CODE);
    }

    #[tokio::test]
    async fn missing_scratch_root_is_a_failed_result() {
        let scratch = tempfile::tempdir().expect("create tempdir");
        let orch = orchestrator(&scratch.path().join("gone"), Duration::from_secs(5));
        let result = orch.execute("c", "echo x").await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error);
    }

    #[test]
    fn timeout_seconds_format() {
        assert_eq!(format_secs(Duration::from_secs(10)), "10");
        assert_eq!(format_secs(Duration::from_millis(1500)), "1.5");
    }
}
