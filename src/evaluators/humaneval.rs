use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{Evaluator, check_file_path, dataset_name, language_tag};
use crate::checker::{FunctionalChecker, SubprocessChecker};
use crate::config::{GenerationOptions, RunConfig};
use crate::context::AppContext;
use crate::error::{EvalError, EvalResult};
use crate::inference::{Generation, ModelBackend};
use crate::models::{
    CompletionPrediction, CompletionResponse, HumanEvalProblem, RawCompletionRecord, RoundResult,
};
use crate::processor::{DataProcessor, PromptRequest};
use crate::sanitize::SanitizeContext;

/// Evaluator for single-file, per-language benchmark datasets; registered
/// as `HumanEval`.
pub struct HumanEvalEvaluator {
    config: RunConfig,
    options: GenerationOptions,
    model: Arc<dyn ModelBackend>,
    processor: Box<dyn DataProcessor>,
    checker: Box<dyn FunctionalChecker>,
    problem_file: PathBuf,
    single_res_path: PathBuf,
    dataset_name: String,
    sample_file: PathBuf,
    metrics: Option<Map<String, Value>>,
}

impl std::fmt::Debug for HumanEvalEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanEvalEvaluator")
            .field("dataset_name", &self.dataset_name)
            .field("problem_file", &self.problem_file)
            .field("single_res_path", &self.single_res_path)
            .field("sample_file", &self.sample_file)
            .finish_non_exhaustive()
    }
}

impl HumanEvalEvaluator {
    /// Registry factory: resolves the processor plugin and wires the
    /// subprocess checker collaborator.
    pub fn factory(config: &RunConfig, ctx: &AppContext) -> EvalResult<Box<dyn Evaluator>> {
        let processor = ctx
            .registries
            .build_processor(&config.dataprocessor_name, config)?;
        let checker = Box::new(SubprocessChecker::from_env());
        let evaluator = Self::new(config.clone(), ctx.model.clone(), processor, checker)?;
        Ok(Box::new(evaluator))
    }

    pub fn new(
        config: RunConfig,
        model: Arc<dyn ModelBackend>,
        processor: Box<dyn DataProcessor>,
        checker: Box<dyn FunctionalChecker>,
    ) -> EvalResult<Self> {
        let options = config.generation_options()?;
        let (problem_file, single_res_path) = check_file_path(&config)?;
        let dataset = dataset_name(&config.dataset_filename).to_string();

        // The sample-file name needs a language segment even when the
        // configured language is blank.
        let sample_language = if config.language.is_empty() {
            "Python"
        } else {
            config.language.as_str()
        };
        let sample_file = Path::new(&config.output_dir).join(format!(
            "{}_{}_results.jsonl",
            config.eval_type, sample_language
        ));

        Ok(Self {
            config,
            options,
            model,
            processor,
            checker,
            problem_file,
            single_res_path,
            dataset_name: dataset,
            sample_file,
            metrics: None,
        })
    }

    /// Persist the raw model output for one problem before sanitization.
    fn save_simple_result(
        &self,
        problem: &Map<String, Value>,
        generation: &Generation,
        idx: &str,
    ) -> EvalResult<()> {
        let record = RawCompletionRecord {
            problem: problem.clone(),
            response: CompletionResponse {
                timestamp_start: generation.timestamp_start,
                timestamp_end: generation.timestamp_end,
                gkwargs: self.options.clone(),
                answers: generation.answers.clone(),
            },
        };
        let path = self.single_res_path.join(format!("{idx}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        Ok(())
    }

    async fn infer(&mut self, content: &str) -> EvalResult<Vec<CompletionPrediction>> {
        let mut predictions = Vec::new();
        let started = Instant::now();
        info!("--------------------------- {} infer start", self.config.eval_type);

        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            let raw: Map<String, Value> = serde_json::from_str(line)?;
            let problem: HumanEvalProblem = serde_json::from_value(Value::Object(raw.clone()))?;
            let idx = problem.task_id.replace('/', "_");
            info!("--------------------------- infer {idx}");

            let prompt = self.processor.build_prompt(&PromptRequest {
                eval_type: &self.config.eval_type,
                language: &self.config.language,
                prompt: Some(&problem.prompt),
                signature_with_docstring: None,
            })?;
            debug!(prompt = %prompt, "rendered prompt");

            let generation = self.model.generate(&prompt, &self.options).await?;
            self.save_simple_result(&raw, &generation, &idx)?;

            let meta = SanitizeContext {
                signature: raw.get("signature").and_then(Value::as_str),
            };
            let answers =
                self.processor
                    .sanitize_answers(&self.config.language, &generation.answers, meta);
            for completion in answers {
                predictions.push(CompletionPrediction {
                    task_id: problem.task_id.clone(),
                    completion,
                });
            }
        }

        info!(
            "Inference time: {:.2} min",
            started.elapsed().as_secs_f64() / 60.0
        );
        Ok(predictions)
    }
}

#[async_trait]
impl Evaluator for HumanEvalEvaluator {
    /// Single-file datasets arrive ready to sample.
    async fn preprocess(&mut self) -> EvalResult<()> {
        Ok(())
    }

    async fn sample(&mut self) -> EvalResult<()> {
        let content = std::fs::read_to_string(&self.problem_file)?;
        let predictions = self.infer(&content).await?;

        let lines: Vec<String> = predictions
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<_, _>>()?;
        std::fs::write(&self.sample_file, lines.join("\n"))?;
        Ok(())
    }

    async fn eval(&mut self) -> EvalResult<()> {
        let metrics = self
            .checker
            .evaluate(&self.sample_file, &self.problem_file)
            .await?;
        info!("--------------------------- {} infer results", self.config.eval_type);
        info!(?metrics, "checker summary");
        self.metrics = Some(metrics);
        Ok(())
    }

    fn extract_results(&self) -> EvalResult<RoundResult> {
        let metrics = self
            .metrics
            .as_ref()
            .ok_or_else(|| EvalError::checker("no checker summary to extract from"))?;
        let pass_rate = metrics
            .get("pass@1")
            .and_then(Value::as_f64)
            .ok_or_else(|| EvalError::checker("checker summary has no pass@1"))?;

        Ok(RoundResult {
            language_tag: language_tag(&self.dataset_name, &self.config.language),
            pass_rate,
        })
    }
}
