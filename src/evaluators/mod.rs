pub mod babelcode;
pub mod humaneval;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::RunConfig;
use crate::error::{EvalError, EvalResult};
use crate::models::RoundResult;

pub use babelcode::BabelCodeEvaluator;
pub use humaneval::HumanEvalEvaluator;

/// Pipeline states in execution order. Strictly sequential: no skipping,
/// no re-entry; one pass per evaluator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Preprocessed,
    Sampled,
    Evaluated,
    Extracted,
    Done,
}

impl Stage {
    pub fn next(self) -> Self {
        match self {
            Self::Created => Self::Preprocessed,
            Self::Preprocessed => Self::Sampled,
            Self::Sampled => Self::Evaluated,
            Self::Evaluated => Self::Extracted,
            Self::Extracted => Self::Done,
            Self::Done => Self::Done,
        }
    }
}

/// One evaluation-format pipeline, constructed fresh per round through the
/// evaluator registry.
#[async_trait]
pub trait Evaluator: Send {
    /// Format-specific dataset preparation; a no-op for single-file formats.
    async fn preprocess(&mut self) -> EvalResult<()>;

    /// Generate, persist and sanitize a completion for every problem;
    /// writes the predictions file once at stage end.
    async fn sample(&mut self) -> EvalResult<()>;

    /// Hand the predictions file to the external correctness checker.
    async fn eval(&mut self) -> EvalResult<()>;

    /// Parse the checker's verdict into a `(language_tag, pass_rate)` pair.
    fn extract_results(&self) -> EvalResult<RoundResult>;

    /// Drive the full pipeline in stage order.
    async fn run(&mut self) -> EvalResult<RoundResult> {
        let mut stage = Stage::Created;

        self.preprocess().await?;
        stage = stage.next();
        debug!(?stage, "pipeline stage complete");

        self.sample().await?;
        stage = stage.next();
        debug!(?stage, "pipeline stage complete");

        self.eval().await?;
        stage = stage.next();
        debug!(?stage, "pipeline stage complete");

        let result = self.extract_results()?;
        stage = stage.next();
        debug!(?stage, "pipeline stage complete");

        stage = stage.next();
        debug!(?stage, language_tag = %result.language_tag, "pipeline complete");
        Ok(result)
    }
}

/// Dataset file name with its `.jsonl` suffix removed.
pub(crate) fn dataset_name(filename: &str) -> &str {
    match filename.find(".jsonl") {
        Some(pos) => &filename[..pos],
        None => filename,
    }
}

/// Language tag combining the target language with the natural-language
/// locale derived from the dataset-filename suffix convention: a `_CN`
/// suffix maps to `cn`, anything else to the default `en`.
pub(crate) fn language_tag(dataset_name: &str, language: &str) -> String {
    let natural_language = if dataset_name.ends_with("_CN") {
        "cn"
    } else {
        "en"
    };
    format!("{language}_{natural_language}")
}

/// Resolve the dataset path and create the per-item record directory.
///
/// A missing dataset file is a startup precondition failure, fatal before
/// any stage runs.
pub(crate) fn check_file_path(config: &RunConfig) -> EvalResult<(PathBuf, PathBuf)> {
    let problem_file = Path::new(&config.input_dir).join(&config.dataset_filename);
    if !problem_file.exists() {
        error!(problem_file = %problem_file.display(), "dataset file does not exist");
        return Err(EvalError::config(format!(
            "dataset file {} does not exist",
            problem_file.display()
        )));
    }

    let single_res_path =
        Path::new(&config.output_dir).join(format!("{}_jsons", config.eval_type));
    std::fs::create_dir_all(&single_res_path)?;
    Ok((problem_file, single_res_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Created;
        let order = [
            Stage::Preprocessed,
            Stage::Sampled,
            Stage::Evaluated,
            Stage::Extracted,
            Stage::Done,
        ];
        for expected in order {
            stage = stage.next();
            assert_eq!(stage, expected);
        }
        assert_eq!(Stage::Done.next(), Stage::Done);
    }

    #[test]
    fn test_dataset_name_strips_jsonl_suffix() {
        assert_eq!(dataset_name("HumanEval.jsonl"), "HumanEval");
        assert_eq!(dataset_name("BabelCode_HumanEval_CN.jsonl"), "BabelCode_HumanEval_CN");
        assert_eq!(dataset_name("problems"), "problems");
    }

    #[test]
    fn test_language_tag_locale_suffix() {
        assert_eq!(language_tag("HumanEval_CN", "Python"), "Python_cn");
        assert_eq!(language_tag("HumanEval", "Python"), "Python_en");
        assert_eq!(language_tag("BabelCode_HumanEval", "Go"), "Go_en");
    }

    #[test]
    fn test_check_file_path_missing_dataset_is_fatal() {
        let dir = tempdir().unwrap();
        let config = crate::config::RunConfig::from_json(&json!({
            "input_dir": dir.path().join("nowhere").to_string_lossy(),
            "output_dir": dir.path().to_string_lossy(),
        }))
        .unwrap();

        let err = check_file_path(&config).unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[test]
    fn test_check_file_path_creates_record_directory() {
        let dir = tempdir().unwrap();
        let input_dir = dir.path().join("in");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("HumanEval.jsonl"), "{}").unwrap();

        let config = crate::config::RunConfig::from_json(&json!({
            "input_dir": input_dir.to_string_lossy(),
            "output_dir": dir.path().join("out").to_string_lossy(),
        }))
        .unwrap();

        let (problem_file, single_res_path) = check_file_path(&config).unwrap();
        assert!(problem_file.ends_with("HumanEval.jsonl"));
        assert!(single_res_path.is_dir());
        assert!(single_res_path.ends_with("HumanEval_jsons"));
    }
}
