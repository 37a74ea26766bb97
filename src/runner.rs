use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::config::RunConfig;
use crate::context::AppContext;
use crate::error::EvalResult;
use crate::models::AggregateResult;
use crate::registry::EvaluatorFactory;

/// Evaluate using a configuration document already parsed from JSON.
pub async fn evaluate_from_json(value: &Value, ctx: &AppContext) -> EvalResult<()> {
    let config = RunConfig::from_json(value)?;
    let factory = *ctx.registries.evaluators.resolve(&config.eval_type)?;
    run_rounds(factory, &config, ctx).await
}

/// Evaluate using the process environment.
pub async fn evaluate_from_env(ctx: &AppContext) -> EvalResult<()> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let config = RunConfig::from_env(&env)?;
    let factory = *ctx.registries.evaluators.resolve(&config.eval_type)?;
    run_rounds(factory, &config, ctx).await
}

/// Run the configured number of evaluation rounds.
///
/// Each round constructs a fresh evaluator over its own output
/// subdirectory; the only state carried across rounds is the aggregate
/// document, rewritten after every round so a killed process leaves a
/// readable partial result. The completion sentinel is written only after
/// every round has finished.
pub async fn run_rounds(
    factory: EvaluatorFactory,
    config: &RunConfig,
    ctx: &AppContext,
) -> EvalResult<()> {
    let output_file = Path::new(&config.output_dir).join("result.json");
    let mut aggregate = AggregateResult::new(config.runtime_type.as_str());

    for round in 1..=config.eval_times {
        let round_config =
            config.with_output_dir(format!("{}/output_{round}", config.output_dir));
        std::fs::create_dir_all(&round_config.output_dir)?;

        let mut evaluator = factory(&round_config, ctx)?;
        let result = evaluator.run().await?;

        aggregate.record_round(round, &result);
        std::fs::write(&output_file, serde_json::to_string_pretty(&aggregate)?)?;
        info!(
            round,
            pass_rate = result.pass_rate,
            average = aggregate.result_data.average,
            "round complete"
        );
    }

    std::fs::write(Path::new(&config.output_dir).join("finish.txt"), "finish")?;
    Ok(())
}
