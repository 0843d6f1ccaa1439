use ac_optimizer::{ClientConfig, Evaluation, HttpNegotiator, Optimization};
use ac_types::{AcResult, EvaluationResult, OptionInput, ResolvedValue, ValueResolver, Variable};
use tracing_subscriber::EnvFilter;

ac_types::strategy! {
    fn linear_penalty(resolver: &dyn ValueResolver, _args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
        let width = resolver.resolve("width", &[])?.as_f64().unwrap_or_default();
        Ok(ResolvedValue::Float(width * 0.5))
    }
}

ac_types::strategy! {
    fn quadratic_penalty(resolver: &dyn ValueResolver, _args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
        let width = resolver.resolve("width", &[])?.as_f64().unwrap_or_default();
        Ok(ResolvedValue::Float(width * width * 0.05))
    }
}

fn objective(evaluation: &Evaluation) -> AcResult<EvaluationResult> {
    let width = evaluation.resolve_f64("width")?;
    let rate = evaluation.resolve_f64("rate")?;
    let penalty = evaluation.resolve_f64("penalty")?;
    let cached = if evaluation.resolve_bool("cached")? { 0.8 } else { 1.0 };

    let cost = (width - 6.0).powi(2) * rate * cached + penalty;
    Ok(EvaluationResult::new(vec![cost]).with_inequality_constraints(vec![width - 10.0]))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let variables = vec![
        Variable::integer("width", 0, 12)?,
        Variable::real("rate", 0.1, 2.0)?,
        Variable::binary("cached"),
        Variable::choice(
            "penalty",
            vec![
                OptionInput::from(linear_penalty::strategy()),
                OptionInput::from(quadratic_penalty::strategy()),
            ],
        )?,
    ];

    let negotiator = HttpNegotiator::from_config(&config);
    let optimization = Optimization::new(variables, objective, config)?;
    ac_server::prepare_and_serve(optimization, &negotiator).await?;
    Ok(())
}
