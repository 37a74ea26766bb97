use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EvalError, EvalResult};

/// Immutable configuration for one benchmark run.
///
/// Built once per process from a JSON document or from environment
/// variables; rounds derive copies with an overridden output directory and
/// never mutate a shared instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Directory holding the benchmark dataset files
    #[serde(default = "default_input_dir")]
    pub input_dir: String,
    /// Directory the run writes all artifacts under
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Identifier of the model runtime being measured
    #[serde(default = "default_runtime_type")]
    pub runtime_type: String,
    /// Dataset file name inside `input_dir`
    #[serde(default = "default_dataset_filename")]
    pub dataset_filename: String,
    /// Evaluation format key resolved against the evaluator registry
    #[serde(default = "default_eval_type")]
    pub eval_type: String,
    /// Target programming language
    #[serde(default = "default_language")]
    pub language: String,
    /// Processor key resolved against the processor registry
    #[serde(default = "default_dataprocessor_name")]
    pub dataprocessor_name: String,
    /// Opaque generation-options JSON blob, parsed per round
    #[serde(default = "default_gkwargs")]
    pub gkwargs: String,
    /// Number of evaluation rounds
    #[serde(default = "default_eval_times")]
    pub eval_times: u32,
}

fn default_input_dir() -> String {
    "data".to_string()
}

fn default_output_dir() -> String {
    "/output".to_string()
}

fn default_runtime_type() -> String {
    "hft".to_string()
}

fn default_dataset_filename() -> String {
    "HumanEval.jsonl".to_string()
}

fn default_eval_type() -> String {
    "HumanEval".to_string()
}

fn default_language() -> String {
    "Java".to_string()
}

fn default_dataprocessor_name() -> String {
    "codellama-34b-base-hft".to_string()
}

fn default_gkwargs() -> String {
    "{}".to_string()
}

fn default_eval_times() -> u32 {
    1
}

impl RunConfig {
    /// Build a configuration from a parsed JSON document; missing keys fall
    /// back to the documented defaults, unknown keys are ignored.
    pub fn from_json(value: &Value) -> EvalResult<Self> {
        serde_json::from_value(value.clone()).map_err(EvalError::Json)
    }

    /// Build a configuration from environment variables.
    ///
    /// Generation options arrive as chunked `GKWARGS_0..n` JSON fragments
    /// and evaluation settings as chunked `EKWARGS_0..n` fragments; both
    /// are reassembled before parsing.
    pub fn from_env(env: &HashMap<String, String>) -> EvalResult<Self> {
        let gkwargs = collect_keyword_data("GKWARGS_", env)?;
        let ekwargs = collect_keyword_data("EKWARGS_", env)?;

        Ok(Self {
            input_dir: env
                .get("INPUT_DIR")
                .cloned()
                .unwrap_or_else(default_input_dir),
            output_dir: env
                .get("OUTPUT_DIR")
                .cloned()
                .unwrap_or_else(default_output_dir),
            runtime_type: string_field(&gkwargs, "runtime_type")
                .unwrap_or_else(default_runtime_type),
            gkwargs: serde_json::to_string(&gkwargs)?,
            dataset_filename: string_field(&ekwargs, "dataset_filename")
                .unwrap_or_else(default_dataset_filename),
            eval_type: string_field(&ekwargs, "eval_type").unwrap_or_else(default_eval_type),
            language: string_field(&ekwargs, "language").unwrap_or_else(default_language),
            dataprocessor_name: string_field(&ekwargs, "dataprocessor_name")
                .unwrap_or_else(default_dataprocessor_name),
            eval_times: count_field(&ekwargs, "eval_times")?.unwrap_or_else(default_eval_times),
        })
    }

    /// Return a copy with only the output directory replaced.
    pub fn with_output_dir(&self, output_dir: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..self.clone()
        }
    }

    /// Parse the opaque `gkwargs` blob into typed generation options.
    pub fn generation_options(&self) -> EvalResult<GenerationOptions> {
        serde_json::from_str(&self.gkwargs)
            .map_err(|e| EvalError::config(format!("invalid gkwargs blob: {e}")))
    }
}

/// Reassemble a chunked environment value: `{prefix}0`, `{prefix}1`, ... are
/// concatenated until the first missing index, then parsed as one JSON
/// object. No chunks at all yields an empty object.
fn collect_keyword_data(prefix: &str, env: &HashMap<String, String>) -> EvalResult<Value> {
    let mut data = String::new();
    let mut i = 0;
    while let Some(chunk) = env.get(&format!("{prefix}{i}")) {
        data.push_str(chunk);
        i += 1;
    }
    let raw = if data.is_empty() { "{}" } else { data.as_str() };
    serde_json::from_str(raw)
        .map_err(|e| EvalError::config(format!("invalid {prefix}* chunks: {e}")))
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Round counts may arrive as a JSON number or as a quoted string.
fn count_field(value: &Value, key: &str) -> EvalResult<Option<u32>> {
    match value.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(n as u32))
            .ok_or_else(|| EvalError::config(format!("{key} must be a non-negative integer"))),
        Some(Value::String(s)) => s
            .parse::<u32>()
            .map(Some)
            .map_err(|_| EvalError::config(format!("{key} is not an integer: {s}"))),
        Some(other) => Err(EvalError::config(format!("{key} has invalid type: {other}"))),
    }
}

/// Typed view of the generation-options bag handed to the model backend.
///
/// Unrecognized keys are ignored on parse; missing keys use the documented
/// defaults. The parsed options are echoed into every per-item audit record.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationOptions {
    #[serde(default = "default_max_length")]
    pub max_length_input: u32,
    #[serde(default = "default_max_length")]
    pub max_length_output: u32,
    #[serde(default = "default_num_beams")]
    pub num_beams: u32,
    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: u32,
    #[serde(default)]
    pub no_repeat_ngram_size: u32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub do_sample: bool,
}

fn default_max_length() -> u32 {
    1024
}

fn default_num_beams() -> u32 {
    1
}

fn default_num_return_sequences() -> u32 {
    1
}

fn default_repetition_penalty() -> f64 {
    1.0
}

fn default_top_k() -> u32 {
    50
}

fn default_top_p() -> f64 {
    1.0
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_length_input: default_max_length(),
            max_length_output: default_max_length(),
            num_beams: default_num_beams(),
            num_return_sequences: default_num_return_sequences(),
            no_repeat_ngram_size: 0,
            repetition_penalty: default_repetition_penalty(),
            temperature: 0.0,
            top_k: default_top_k(),
            top_p: default_top_p(),
            do_sample: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_from_json() {
        let value = json!({
            "input_dir": "/data/benchmarks",
            "output_dir": "/results",
            "eval_type": "BabelCode",
            "language": "Go",
            "eval_times": 3
        });

        let config = RunConfig::from_json(&value).unwrap();
        assert_eq!(config.input_dir, "/data/benchmarks");
        assert_eq!(config.output_dir, "/results");
        assert_eq!(config.eval_type, "BabelCode");
        assert_eq!(config.language, "Go");
        assert_eq!(config.eval_times, 3);
    }

    #[test]
    fn test_config_defaults() {
        let config = RunConfig::from_json(&json!({})).unwrap();
        assert_eq!(config.input_dir, "data");
        assert_eq!(config.output_dir, "/output");
        assert_eq!(config.runtime_type, "hft");
        assert_eq!(config.dataset_filename, "HumanEval.jsonl");
        assert_eq!(config.eval_type, "HumanEval");
        assert_eq!(config.language, "Java");
        assert_eq!(config.dataprocessor_name, "codellama-34b-base-hft");
        assert_eq!(config.gkwargs, "{}");
        assert_eq!(config.eval_times, 1);
    }

    #[test]
    fn test_config_from_env_chunked_kwargs() {
        let mut env = HashMap::new();
        env.insert("INPUT_DIR".to_string(), "/in".to_string());
        env.insert("OUTPUT_DIR".to_string(), "/out".to_string());
        // Generation options split across two chunks
        env.insert(
            "GKWARGS_0".to_string(),
            r#"{"runtime_type": "vllm", "temper"#.to_string(),
        );
        env.insert("GKWARGS_1".to_string(), r#"ature": 0.8}"#.to_string());
        env.insert(
            "EKWARGS_0".to_string(),
            r#"{"eval_type": "BabelCode", "language": "C++", "eval_times": "2"}"#.to_string(),
        );

        let config = RunConfig::from_env(&env).unwrap();
        assert_eq!(config.input_dir, "/in");
        assert_eq!(config.output_dir, "/out");
        assert_eq!(config.runtime_type, "vllm");
        assert_eq!(config.eval_type, "BabelCode");
        assert_eq!(config.language, "C++");
        assert_eq!(config.eval_times, 2);

        let options = config.generation_options().unwrap();
        assert_eq!(options.temperature, 0.8);
    }

    #[test]
    fn test_config_from_env_defaults() {
        let config = RunConfig::from_env(&HashMap::new()).unwrap();
        assert_eq!(config.input_dir, "data");
        assert_eq!(config.dataset_filename, "HumanEval.jsonl");
        assert_eq!(config.language, "Java");
        assert_eq!(config.eval_times, 1);
        assert_eq!(config.gkwargs, "{}");
    }

    #[test]
    fn test_with_output_dir_replaces_only_output_dir() {
        let config = RunConfig::from_json(&json!({"language": "Python"})).unwrap();
        let derived = config.with_output_dir("/output/output_2");

        assert_eq!(derived.output_dir, "/output/output_2");
        assert_eq!(derived.language, "Python");
        assert_eq!(config.output_dir, "/output");
    }

    #[test]
    fn test_generation_options_defaults() {
        let options = GenerationOptions::default();
        assert_eq!(options.max_length_input, 1024);
        assert_eq!(options.max_length_output, 1024);
        assert_eq!(options.num_beams, 1);
        assert_eq!(options.num_return_sequences, 1);
        assert_eq!(options.no_repeat_ngram_size, 0);
        assert_eq!(options.repetition_penalty, 1.0);
        assert_eq!(options.temperature, 0.0);
        assert_eq!(options.top_k, 50);
        assert_eq!(options.top_p, 1.0);
        assert!(!options.do_sample);
    }

    #[test]
    fn test_generation_options_ignores_unknown_keys() {
        let config = RunConfig {
            gkwargs: r#"{"temperature": 0.2, "exotic_knob": true}"#.to_string(),
            ..RunConfig::from_json(&json!({})).unwrap()
        };

        let options = config.generation_options().unwrap();
        assert_eq!(options.temperature, 0.2);
    }

    #[test]
    fn test_generation_options_bad_blob_is_configuration_error() {
        let config = RunConfig {
            gkwargs: "not json".to_string(),
            ..RunConfig::from_json(&json!({})).unwrap()
        };

        let err = config.generation_options().unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }
}
