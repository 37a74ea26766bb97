use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::GenerationOptions;

/// One entry of a single-file (per-language) benchmark dataset.
///
/// Fields beyond the identifier and prompt material are carried through
/// verbatim so audit records preserve the full problem definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanEvalProblem {
    pub task_id: String,
    pub prompt: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the multi-language batch dataset produced by the external
/// dataset-conversion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProblem {
    pub qid: Value,
    pub language: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub signature_with_docstring: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Model output for one problem, persisted verbatim before sanitization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub gkwargs: GenerationOptions,
    pub answers: Vec<String>,
}

/// Per-item audit record: the problem's original JSON with the raw model
/// response attached. One file per item, written during `sample`, never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCompletionRecord {
    #[serde(flatten)]
    pub problem: Map<String, Value>,
    pub response: CompletionResponse,
}

/// One sanitized completion row of the single-file predictions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPrediction {
    pub task_id: String,
    pub completion: String,
}

/// One sanitized completion row of the batch predictions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPrediction {
    pub qid: Value,
    pub language: String,
    pub code: String,
}

/// Scalar outcome of one pipeline run: the pass-rate and the
/// language/locale tag it was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub language_tag: String,
    pub pass_rate: f64,
}

/// The multi-round output document, rewritten after every round so a killed
/// process leaves a readable partial result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub language: String,
    pub runtime: String,
    pub result_data: ResultData,
}

/// Per-round pass-rates keyed `round_1..round_k`, with the running average
/// serialized after them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultData {
    #[serde(flatten)]
    pub rounds: Map<String, Value>,
    pub average: f64,
}

impl AggregateResult {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            language: String::new(),
            runtime: runtime.into(),
            result_data: ResultData {
                rounds: Map::new(),
                average: 0.0,
            },
        }
    }

    /// Fold one round's outcome into the document: records the round under
    /// `round_{n}` and recomputes the average over all completed rounds.
    pub fn record_round(&mut self, round: u32, result: &RoundResult) {
        self.language = result.language_tag.clone();
        self.result_data
            .rounds
            .insert(format!("round_{round}"), Value::from(result.pass_rate));

        let sum: f64 = self
            .result_data
            .rounds
            .values()
            .filter_map(Value::as_f64)
            .sum();
        self.result_data.average = sum / self.result_data.rounds.len() as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(tag: &str, rate: f64) -> RoundResult {
        RoundResult {
            language_tag: tag.to_string(),
            pass_rate: rate,
        }
    }

    #[test]
    fn test_running_average_over_completed_rounds() {
        let mut aggregate = AggregateResult::new("hft");

        aggregate.record_round(1, &round("Python_en", 0.4));
        assert_eq!(aggregate.result_data.average, 0.4);

        aggregate.record_round(2, &round("Python_en", 0.6));
        assert_eq!(aggregate.result_data.average, 0.5);

        aggregate.record_round(3, &round("Python_en", 0.5));
        assert_eq!(aggregate.result_data.average, 0.5);
    }

    #[test]
    fn test_aggregate_serializes_rounds_in_order_with_average_last() {
        let mut aggregate = AggregateResult::new("hft");
        aggregate.record_round(1, &round("Go_en", 0.25));
        aggregate.record_round(2, &round("Go_en", 0.75));

        let json = serde_json::to_string(&aggregate).unwrap();
        let round_1 = json.find("round_1").unwrap();
        let round_2 = json.find("round_2").unwrap();
        let average = json.find("average").unwrap();
        assert!(round_1 < round_2);
        assert!(round_2 < average);

        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["language"], "Go_en");
        assert_eq!(parsed["runtime"], "hft");
        assert_eq!(parsed["result_data"]["average"], 0.5);
    }

    #[test]
    fn test_problem_record_roundtrips_extra_fields() {
        let line = r#"{"task_id": "p1", "prompt": "def f(x):", "entry_point": "f"}"#;
        let problem: HumanEvalProblem = serde_json::from_str(line).unwrap();
        assert_eq!(problem.task_id, "p1");
        assert_eq!(problem.extra["entry_point"], "f");
    }
}
