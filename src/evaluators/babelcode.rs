use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{Evaluator, check_file_path, dataset_name, language_tag};
use crate::checker::{BabelCodeRunner, ScaffoldRunner, scrape_pass_rate};
use crate::config::{GenerationOptions, RunConfig};
use crate::context::AppContext;
use crate::error::EvalResult;
use crate::inference::{Generation, ModelBackend};
use crate::models::{BatchPrediction, BatchProblem, CompletionResponse, RawCompletionRecord, RoundResult};
use crate::processor::{DataProcessor, PromptRequest};
use crate::sanitize::SanitizeContext;

/// Evaluator for the shared multi-language batch dataset; registered as
/// `BabelCode`. Differs from the single-file pipeline in its preprocess
/// (external conversion + scaffold generation + language filter) and in
/// scraping its verdict from the checker's log stream.
pub struct BabelCodeEvaluator {
    config: RunConfig,
    options: GenerationOptions,
    model: Arc<dyn ModelBackend>,
    processor: Box<dyn DataProcessor>,
    scaffold: Box<dyn ScaffoldRunner>,
    problem_file: PathBuf,
    single_res_path: PathBuf,
    dataset_name: String,
    babelcode_dataset_name: String,
}

/// Map the benchmark dataset file onto the checker's parsed-dataset name.
fn babelcode_dataset(eval_type: &str, dataset_filename: &str) -> String {
    if eval_type != "BabelCode" {
        return String::new();
    }
    match dataset_filename {
        "BabelCode_HumanEval.jsonl" => "human_eval_en".to_string(),
        "BabelCode_HumanEval_CN.jsonl" => "human_eval_cn".to_string(),
        _ => String::new(),
    }
}

impl BabelCodeEvaluator {
    /// Registry factory: resolves the processor plugin and wires the
    /// subprocess scaffold/checker collaborators.
    pub fn factory(config: &RunConfig, ctx: &AppContext) -> EvalResult<Box<dyn Evaluator>> {
        let processor = ctx
            .registries
            .build_processor(&config.dataprocessor_name, config)?;
        let scaffold = Box::new(BabelCodeRunner::from_env());
        let evaluator = Self::new(config.clone(), ctx.model.clone(), processor, scaffold)?;
        Ok(Box::new(evaluator))
    }

    pub fn new(
        config: RunConfig,
        model: Arc<dyn ModelBackend>,
        processor: Box<dyn DataProcessor>,
        scaffold: Box<dyn ScaffoldRunner>,
    ) -> EvalResult<Self> {
        let options = config.generation_options()?;
        let (problem_file, single_res_path) = check_file_path(&config)?;
        let dataset = dataset_name(&config.dataset_filename).to_string();
        let babelcode_dataset_name = babelcode_dataset(&config.eval_type, &config.dataset_filename);

        Ok(Self {
            config,
            options,
            model,
            processor,
            scaffold,
            problem_file,
            single_res_path,
            dataset_name: dataset,
            babelcode_dataset_name,
        })
    }

    /// Problems filtered down to the configured target language.
    fn filtered_file(&self) -> PathBuf {
        Path::new(&self.config.output_dir).join(format!("babelcode_{}.jsonl", self.config.language))
    }

    fn result_file(&self) -> PathBuf {
        Path::new(&self.config.output_dir).join(format!(
            "{}_{}_result.jsonl",
            self.config.eval_type, self.config.language
        ))
    }

    /// The scaffold generator reads its generation configs relative to the
    /// working directory; stage a copy of the checker's base config there
    /// for the duration of the call. Failures are logged, not fatal.
    fn stage_generation_configs(&self) {
        match std::fs::create_dir_all("configs/generation") {
            Ok(()) => info!("Folder 'configs/generation' is ready"),
            Err(e) => info!("Folder 'configs/generation' not created: {e}"),
        }
        let base_gin = self.scaffold.home().join("configs/generation/base.gin");
        match std::fs::copy(&base_gin, "configs/generation/base.gin") {
            Ok(_) => info!("File 'generation/base.gin' copied successfully"),
            Err(e) => info!("Copy file 'generation/base.gin' failed: {e}"),
        }
    }

    fn cleanup_generation_configs(&self) {
        match std::fs::remove_dir_all("configs") {
            Ok(()) => info!("Folder 'configs' and its content removed"),
            Err(e) => info!("Folder 'configs' not deleted: {e}"),
        }
    }

    fn save_simple_result(
        &self,
        problem: &Map<String, Value>,
        generation: &Generation,
        idx: usize,
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
        let path = self
            .single_res_path
            .join(format!("{}_{idx}.json", self.config.eval_type));
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        Ok(())
    }

    async fn infer(&mut self, content: &str) -> EvalResult<Vec<BatchPrediction>> {
        let mut predictions = Vec::new();
        let started = Instant::now();
        info!(
            "--------------------------- {} {} infer start",
            self.config.eval_type, self.config.language
        );

        for (idx, line) in content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
        {
            let raw: Map<String, Value> = serde_json::from_str(line)?;
            let problem: BatchProblem = serde_json::from_value(Value::Object(raw.clone()))?;
            info!("--------------------------- infer {idx}");

            let prompt = self.processor.build_prompt(&PromptRequest {
                eval_type: &self.config.eval_type,
                language: &self.config.language,
                prompt: None,
                signature_with_docstring: problem.signature_with_docstring.as_deref(),
            })?;
            debug!(prompt = %prompt, "rendered prompt");

            let generation = self.model.generate(&prompt, &self.options).await?;
            self.save_simple_result(&raw, &generation, idx)?;

            let meta = SanitizeContext {
                signature: problem.signature.as_deref(),
            };
            let answers =
                self.processor
                    .sanitize_answers(&self.config.language, &generation.answers, meta);
            for code in answers {
                predictions.push(BatchPrediction {
                    qid: problem.qid.clone(),
                    language: problem.language.clone(),
                    code,
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
impl Evaluator for BabelCodeEvaluator {
    async fn preprocess(&mut self) -> EvalResult<()> {
        info!("================dataset_name {}", self.babelcode_dataset_name);
        self.scaffold
            .convert_dataset(&self.babelcode_dataset_name, &self.problem_file)
            .await?;

        self.stage_generation_configs();
        self.scaffold
            .generate_problem_code(&self.babelcode_dataset_name)
            .await?;
        self.cleanup_generation_configs();

        let prompt_info = self.scaffold.home().join(format!(
            "data/problem_code/{}/prompt_info.jsonl",
            self.babelcode_dataset_name
        ));
        filter_json_objects(
            &prompt_info,
            &self.filtered_file(),
            "language",
            &self.config.language,
        )
    }

    async fn sample(&mut self) -> EvalResult<()> {
        let content = std::fs::read_to_string(self.filtered_file())?;
        let predictions = self.infer(&content).await?;

        let lines: Vec<String> = predictions
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<_, _>>()?;
        std::fs::write(self.result_file(), lines.join("\n"))?;
        Ok(())
    }

    async fn eval(&mut self) -> EvalResult<()> {
        self.scaffold
            .evaluate_predictions(
                &format!("tutorial_{}", self.config.language),
                &self.result_file(),
                Path::new(&self.config.output_dir),
                &self.babelcode_dataset_name,
            )
            .await
    }

    fn extract_results(&self) -> EvalResult<RoundResult> {
        let log_file = Path::new(&self.config.output_dir).join(format!(
            "tutorial_{}/logs/logs.INFO",
            self.config.language
        ));
        let pass_rate = scrape_pass_rate(&log_file)?;

        Ok(RoundResult {
            language_tag: language_tag(&self.dataset_name, &self.config.language),
            pass_rate,
        })
    }
}

/// Keep only the records whose `target_field` equals `target_value`,
/// preserving input order; undecodable lines are skipped.
fn filter_json_objects(
    input_file: &Path,
    output_file: &Path,
    target_field: &str,
    target_value: &str,
) -> EvalResult<()> {
    let content = std::fs::read_to_string(input_file)?;
    let mut filtered = String::new();
    for line in content.lines() {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if record.get(target_field).and_then(Value::as_str) == Some(target_value) {
            filtered.push_str(&serde_json::to_string(&record)?);
            filtered.push('\n');
        }
    }
    std::fs::write(output_file, filtered)?;
    Ok(())
}
