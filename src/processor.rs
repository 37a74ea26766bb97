use std::collections::HashMap;

use tracing::debug;

use crate::error::{EvalError, EvalResult};
use crate::sanitize::{SanitizeContext, sanitize};

/// Prompt material for one problem, as the dataset format provides it.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    /// Evaluation format the prompt is rendered for
    pub eval_type: &'a str,
    /// Target programming language name substituted into the template
    pub language: &'a str,
    /// Verbatim prompt text (single-file formats)
    pub prompt: Option<&'a str>,
    /// Synthesized signature + docstring string (batch formats)
    pub signature_with_docstring: Option<&'a str>,
}

/// The plugin pair of prompt building and completion sanitization, selected
/// per model runtime through the processor registry.
pub trait DataProcessor: Send {
    /// Render the prompt sent to the model for one problem.
    fn build_prompt(&mut self, request: &PromptRequest<'_>) -> EvalResult<String>;

    /// Recover runnable code fragments from the raw model answers.
    fn sanitize_answers(
        &self,
        language: &str,
        answers: &[String],
        meta: SanitizeContext<'_>,
    ) -> Vec<String>;
}

/// Per-language template store, built lazily and memoized for the lifetime
/// of the owning processor instance.
pub struct PromptBuilder {
    templates: HashMap<String, String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Memoize `template` for `language`; a template already present is
    /// left untouched.
    pub fn add_template(&mut self, language: &str, template: &str) {
        self.templates
            .entry(language.to_string())
            .or_insert_with(|| template.to_string());
    }

    /// Substitute the two ordered template arguments: the language name,
    /// then the problem's prompt material.
    pub fn render(&self, language: &str, body: &str) -> EvalResult<String> {
        let template = self
            .templates
            .get(language)
            .ok_or_else(|| EvalError::MissingTemplate {
                language: language.to_string(),
            })?;
        Ok(template.replacen("{}", language, 1).replacen("{}", body, 1))
    }
}

/// Instruction-tuned CodeLlama prompt wrapper.
const CODELLAMA_INSTRUCTION_TEMPLATE: &str = "Below is an instruction that describes a task. Write a response that appropriately completes the request.\n\n\n### Instruction:\nCreate a {} script for this problem:\n{}\n\n### Response:";

/// Processor for the CodeLlama-34B base model served through the HFT
/// runtime; registered as `codellama-34b-base-hft`.
pub struct CodeLlamaHftProcessor {
    builder: PromptBuilder,
}

impl CodeLlamaHftProcessor {
    pub fn new() -> Self {
        Self {
            builder: PromptBuilder::new(),
        }
    }
}

impl DataProcessor for CodeLlamaHftProcessor {
    fn build_prompt(&mut self, request: &PromptRequest<'_>) -> EvalResult<String> {
        self.builder
            .add_template(request.language, CODELLAMA_INSTRUCTION_TEMPLATE);

        let body = match request.eval_type {
            "HumanEval" => request
                .prompt
                .ok_or_else(|| EvalError::config("problem record has no prompt text"))?,
            "BabelCode" => request.signature_with_docstring.ok_or_else(|| {
                EvalError::config("problem record has no signature_with_docstring")
            })?,
            other => {
                return Err(EvalError::UnsupportedDatasetFormat {
                    eval_type: other.to_string(),
                });
            }
        };
        self.builder.render(request.language, body)
    }

    fn sanitize_answers(
        &self,
        language: &str,
        answers: &[String],
        meta: SanitizeContext<'_>,
    ) -> Vec<String> {
        answers
            .iter()
            .map(|answer| {
                debug!(answer = %answer, "raw model answer");
                sanitize(language, answer, meta)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_language_then_body() {
        let mut builder = PromptBuilder::new();
        builder.add_template("Python", "Create a {} script for this problem:\n{}");

        let rendered = builder.render("Python", "def f(x):").unwrap();
        assert_eq!(rendered, "Create a Python script for this problem:\ndef f(x):");
    }

    #[test]
    fn test_render_before_add_is_missing_template() {
        let builder = PromptBuilder::new();
        let err = builder.render("Go", "func f()").unwrap_err();
        assert!(matches!(err, EvalError::MissingTemplate { language } if language == "Go"));
    }

    #[test]
    fn test_template_is_memoized_per_language() {
        let mut builder = PromptBuilder::new();
        builder.add_template("Java", "first {} {}");
        builder.add_template("Java", "second {} {}");

        let rendered = builder.render("Java", "body").unwrap();
        assert_eq!(rendered, "first Java body");
    }

    #[test]
    fn test_codellama_prompt_for_single_file_format() {
        let mut processor = CodeLlamaHftProcessor::new();
        let prompt = processor
            .build_prompt(&PromptRequest {
                eval_type: "HumanEval",
                language: "Python",
                prompt: Some("def f(x):"),
                signature_with_docstring: None,
            })
            .unwrap();

        assert!(prompt.starts_with("Below is an instruction"));
        assert!(prompt.contains("Create a Python script for this problem:\ndef f(x):"));
        assert!(prompt.ends_with("### Response:"));
    }

    #[test]
    fn test_codellama_prompt_for_batch_format() {
        let mut processor = CodeLlamaHftProcessor::new();
        let prompt = processor
            .build_prompt(&PromptRequest {
                eval_type: "BabelCode",
                language: "Go",
                prompt: None,
                signature_with_docstring: Some("func Add(a int, b int) int\n// Adds two numbers."),
            })
            .unwrap();

        assert!(prompt.contains("Create a Go script for this problem:\nfunc Add(a int, b int) int"));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let mut processor = CodeLlamaHftProcessor::new();
        let err = processor
            .build_prompt(&PromptRequest {
                eval_type: "MBPP",
                language: "Python",
                prompt: Some("def f():"),
                signature_with_docstring: None,
            })
            .unwrap_err();

        assert!(matches!(err, EvalError::UnsupportedDatasetFormat { eval_type } if eval_type == "MBPP"));
    }

    #[test]
    fn test_sanitize_answers_maps_every_answer() {
        let processor = CodeLlamaHftProcessor::new();
        let answers = vec![
            "```python\ndef f(x):\n    return x\n# Example usage\nf(1)".to_string(),
            "def g():\n    pass".to_string(),
        ];

        let sanitized =
            processor.sanitize_answers("Python", &answers, SanitizeContext::default());
        assert_eq!(sanitized[0], "def f(x):\n    return x");
        assert_eq!(sanitized[1], "def g():\n    pass");
    }
}
