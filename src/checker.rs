use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::info;

use crate::error::{EvalError, EvalResult};

/// Functional-correctness checker for single-file datasets.
///
/// Invoked with the predictions file and the reference problem file;
/// returns the metric map of the checker's structured summary.
#[async_trait]
pub trait FunctionalChecker: Send + Sync {
    async fn evaluate(
        &self,
        sample_file: &Path,
        problem_file: &Path,
    ) -> EvalResult<Map<String, Value>>;
}

/// Subprocess-backed functional checker. The command's last non-empty
/// stdout line must be a JSON object carrying the metrics (`pass@1` among
/// them).
pub struct SubprocessChecker {
    command: String,
}

impl SubprocessChecker {
    /// Command from `CHECKER_CMD`, defaulting to the standard
    /// functional-correctness entry point.
    pub fn from_env() -> Self {
        Self {
            command: std::env::var("CHECKER_CMD")
                .unwrap_or_else(|_| "evaluate_functional_correctness".to_string()),
        }
    }
}

#[async_trait]
impl FunctionalChecker for SubprocessChecker {
    async fn evaluate(
        &self,
        sample_file: &Path,
        problem_file: &Path,
    ) -> EvalResult<Map<String, Value>> {
        let mut command = Command::new(&self.command);
        command
            .arg(sample_file)
            .arg(format!("--problem_file={}", problem_file.display()));

        let output = run_checked(command, &self.command).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_summary_line(&stdout)
    }
}

/// Pull the metric map out of the checker's stdout: the last non-empty line
/// must be a JSON object.
fn parse_summary_line(stdout: &str) -> EvalResult<Map<String, Value>> {
    let summary = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| EvalError::checker("checker produced no output"))?;

    match serde_json::from_str(summary.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(EvalError::checker(format!(
            "checker summary is not an object: {other}"
        ))),
        Err(e) => Err(EvalError::checker(format!(
            "unreadable checker summary {summary:?}: {e}"
        ))),
    }
}

/// External collaborators for the multi-language batch format: dataset
/// conversion, problem-code scaffold generation and prediction checking,
/// all living in one installation directory.
#[async_trait]
pub trait ScaffoldRunner: Send + Sync {
    /// Installation directory the collaborator commands run in.
    fn home(&self) -> &Path;

    /// Convert the benchmark dataset into the checker's parsed form.
    async fn convert_dataset(&self, dataset_name: &str, input_path: &Path) -> EvalResult<()>;

    /// Generate per-language problem scaffolds for a parsed dataset.
    async fn generate_problem_code(&self, dataset_name: &str) -> EvalResult<()>;

    /// Check a predictions file against the generated problem code. The
    /// verdict lands in the experiment's log stream, not on stdout.
    async fn evaluate_predictions(
        &self,
        experiment_name: &str,
        predictions: &Path,
        output_path: &Path,
        dataset_name: &str,
    ) -> EvalResult<()>;
}

/// Subprocess-backed batch collaborators rooted at `BABELCODE_HOME`
/// (default `/babelcode`).
pub struct BabelCodeRunner {
    home: PathBuf,
}

impl BabelCodeRunner {
    pub fn from_env() -> Self {
        Self {
            home: PathBuf::from(
                std::env::var("BABELCODE_HOME").unwrap_or_else(|_| "/babelcode".to_string()),
            ),
        }
    }
}

#[async_trait]
impl ScaffoldRunner for BabelCodeRunner {
    fn home(&self) -> &Path {
        &self.home
    }

    async fn convert_dataset(&self, dataset_name: &str, input_path: &Path) -> EvalResult<()> {
        let mut command = Command::new("python3");
        command
            .arg("convert_dataset.py")
            .arg(format!("--dataset_name={dataset_name}"))
            .arg(format!("--input_path={}", input_path.display()))
            .current_dir(&self.home);

        run_checked(command, "convert_dataset.py").await?;
        Ok(())
    }

    async fn generate_problem_code(&self, dataset_name: &str) -> EvalResult<()> {
        let mut command = Command::new("python3");
        command
            .arg("generate_test_code.py")
            .arg(format!(
                "--gin_path={}",
                self.home.join("configs/generate_code.gin").display()
            ))
            .arg(format!(
                "--input_path={}",
                self.home
                    .join(format!("data/parsed_datasets/{dataset_name}.jsonl"))
                    .display()
            ))
            .arg(format!(
                "--output_path={}",
                self.home
                    .join(format!("data/problem_code/{dataset_name}"))
                    .display()
            ))
            .current_dir(&self.home);

        run_checked(command, "generate_test_code.py").await?;
        Ok(())
    }

    async fn evaluate_predictions(
        &self,
        experiment_name: &str,
        predictions: &Path,
        output_path: &Path,
        dataset_name: &str,
    ) -> EvalResult<()> {
        let mut command = Command::new("python3");
        command
            .arg("evaluate_predictions.py")
            .arg("--gin_file=configs/validation.gin")
            .arg(format!("--experiment_name={experiment_name}"))
            .arg(format!("--predictions={}", predictions.display()))
            .arg(format!("--output_path={}", output_path.display()))
            .arg(format!("--test_code=data/problem_code/{dataset_name}"))
            .arg(format!("--debug_dir={}", output_path.display()))
            .arg("--overwrite")
            .current_dir(&self.home);

        run_checked(command, "evaluate_predictions.py").await?;
        Ok(())
    }
}

/// Run a collaborator command to completion; a spawn failure or non-zero
/// exit status is fatal and carries the stderr tail.
async fn run_checked(mut command: Command, what: &str) -> EvalResult<std::process::Output> {
    info!(command = what, "running external checker collaborator");
    let output = command
        .output()
        .await
        .map_err(|e| EvalError::checker(format!("{what}: failed to spawn: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(EvalError::checker(format!(
            "{what} exited with {}: {}",
            output.status,
            tail.join("\n")
        )));
    }
    Ok(output)
}

static PASS_RATE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Scrape the batch checker's pass-rate from its log stream.
///
/// Only the last six lines are scanned for `estimate_pass@1 = <percent>`,
/// and the percentage is converted to a fraction rounded to five decimal
/// places. Both the window and the conversion are compatibility details of
/// the checker's log format.
pub fn scrape_pass_rate(log_file: &Path) -> EvalResult<f64> {
    let pattern = PASS_RATE_PATTERN
        .get_or_init(|| Regex::new(r"estimate_pass@1\s+=\s+([\d.]+)").expect("static pattern"));

    let content = std::fs::read_to_string(log_file).map_err(|e| {
        EvalError::checker(format!("cannot read checker log {}: {e}", log_file.display()))
    })?;

    let lines: Vec<&str> = content.lines().collect();
    let tail = &lines[lines.len().saturating_sub(6)..];

    let mut value = None;
    for line in tail {
        if let Some(captures) = pattern.captures(line) {
            if let Ok(percent) = captures[1].parse::<f64>() {
                value = Some((percent / 100.0 * 1e5).round() / 1e5);
            }
        }
    }

    value.ok_or_else(|| {
        EvalError::checker(format!(
            "no pass-rate found in the tail of {}",
            log_file.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_summary_line_takes_last_json_object() {
        let stdout = "Reading samples...\nRunning tests...\n{\"pass@1\": 0.42}\n\n";
        let metrics = parse_summary_line(stdout).unwrap();
        assert_eq!(metrics["pass@1"], 0.42);
    }

    #[test]
    fn test_parse_summary_line_rejects_non_object() {
        let err = parse_summary_line("done\n0.42\n").unwrap_err();
        assert!(matches!(err, EvalError::Checker(_)));
    }

    #[test]
    fn test_parse_summary_line_rejects_empty_output() {
        let err = parse_summary_line("\n\n").unwrap_err();
        assert!(matches!(err, EvalError::Checker(_)));
    }

    #[test]
    fn test_scrape_pass_rate_from_log_tail() {
        let mut log = NamedTempFile::new().unwrap();
        writeln!(log, "I0101 loading predictions").unwrap();
        writeln!(log, "I0101 running 160 tests").unwrap();
        writeln!(log, "I0101 estimate_pass@1 = 52.5").unwrap();
        writeln!(log, "I0101 done").unwrap();

        let rate = scrape_pass_rate(log.path()).unwrap();
        assert_eq!(rate, 0.525);
    }

    #[test]
    fn test_scrape_pass_rate_ignores_matches_outside_window() {
        let mut log = NamedTempFile::new().unwrap();
        writeln!(log, "estimate_pass@1 = 99.0").unwrap();
        for i in 0..6 {
            writeln!(log, "filler line {i}").unwrap();
        }

        let err = scrape_pass_rate(log.path()).unwrap_err();
        assert!(matches!(err, EvalError::Checker(_)));
    }

    #[test]
    fn test_scrape_pass_rate_rounds_to_five_decimals() {
        let mut log = NamedTempFile::new().unwrap();
        writeln!(log, "estimate_pass@1 = 33.333333").unwrap();

        let rate = scrape_pass_rate(log.path()).unwrap();
        assert_eq!(rate, 0.33333);
    }
}
