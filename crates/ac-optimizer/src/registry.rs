//! Strategy registry and hydration of executable options.
//!
//! Executable options cross the process boundary as `{name, string}`. The
//! receiving side never compiles the text: it looks the name up among the
//! strategies linked into this binary and installs that callable, attaching
//! the quality scores sent by the optimizer.

use std::collections::BTreeMap;

use ac_types::{
    simple_name, AcResult, ExecutableOption, HydrationError, InboundExecutable, SearchSpace,
    Strategy,
};
use tracing::{debug, warn};

/// Named strategies available for hydration.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Strategy>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with every executable option of `space`.
    pub fn from_space(space: &SearchSpace) -> AcResult<Self> {
        let mut registry = Self::new();
        for strategy in space.strategies() {
            registry.register(strategy.clone())?;
        }
        Ok(registry)
    }

    /// Register a strategy under its fully-qualified name. Registering the
    /// same declaration twice is a no-op; a different declaration under an
    /// existing name is rejected.
    pub fn register(&mut self, strategy: Strategy) -> AcResult<()> {
        if let Some(existing) = self.strategies.get(strategy.name()) {
            if existing.same_callable(&strategy) || existing.source() == strategy.source() {
                return Ok(());
            }
            return Err(HydrationError::DuplicateRegistration {
                name: strategy.name().to_string(),
            }
            .into());
        }
        debug!(strategy = %strategy.name(), "registered strategy");
        self.strategies.insert(strategy.name().to_string(), strategy);
        Ok(())
    }

    pub fn with(mut self, strategy: Strategy) -> AcResult<Self> {
        self.register(strategy)?;
        Ok(self)
    }

    /// Find by exact name, then by a unique match on the simple name.
    pub fn lookup(&self, name: &str) -> AcResult<&Strategy> {
        if let Some(strategy) = self.strategies.get(name) {
            return Ok(strategy);
        }

        let wanted = simple_name(name);
        let candidates: Vec<&Strategy> = self
            .strategies
            .values()
            .filter(|s| s.simple_name() == wanted)
            .collect();

        match candidates.as_slice() {
            [only] => Ok(*only),
            [] => Err(HydrationError::StrategyNotFound {
                name: name.to_string(),
            }
            .into()),
            many => Err(HydrationError::AmbiguousName {
                name: name.to_string(),
                candidates: many.iter().map(|s| s.name().to_string()).collect(),
            }
            .into()),
        }
    }

    /// Turn an inbound executable payload into a live option.
    pub fn hydrate(&self, option_id: &str, inbound: &InboundExecutable) -> AcResult<ExecutableOption> {
        let name = inbound
            .name
            .as_deref()
            .ok_or_else(|| HydrationError::MissingFragment {
                option_id: option_id.to_string(),
            })?;
        let strategy = self.lookup(name)?;

        if let Some(fragment) = inbound.string.as_deref() {
            if normalize(fragment) != normalize(strategy.source()) {
                warn!(
                    option = %option_id,
                    strategy = %strategy.name(),
                    "transmitted source differs from the linked strategy; using the linked implementation"
                );
            }
        }

        debug!(option = %option_id, strategy = %strategy.name(), "hydrated option");
        Ok(ExecutableOption::new(strategy.clone()).with_quality(inbound.quality))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

fn normalize(source: &str) -> String {
    source.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_types::{AcError, QualityScores, ResolvedValue, ValueResolver, Variable};

    ac_types::strategy! {
        fn triple(_resolver: &dyn ValueResolver, args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
            let x = args.first().and_then(ResolvedValue::as_i64).unwrap_or(1);
            Ok(ResolvedValue::Integer(x * 3))
        }
    }

    fn constant(name: &str, value: i64) -> Strategy {
        Strategy::new(name, format!("fn c() {{ {value} }}"), move |_, _| {
            Ok(ResolvedValue::Integer(value))
        })
    }

    fn inbound(name: &str) -> InboundExecutable {
        InboundExecutable {
            name: Some(name.to_string()),
            string: None,
            quality: QualityScores {
                complexity: 0.25,
                readability: 0.75,
                ..QualityScores::default()
            },
        }
    }

    #[test]
    fn lookup_by_full_and_simple_name() {
        let registry = StrategyRegistry::new()
            .with(constant("app::a::fast", 1))
            .unwrap()
            .with(triple::strategy())
            .unwrap();

        assert_eq!(registry.lookup("app::a::fast").unwrap().name(), "app::a::fast");
        assert_eq!(registry.lookup("fast").unwrap().name(), "app::a::fast");
        assert_eq!(registry.lookup("main.fast").unwrap().name(), "app::a::fast");
        assert!(registry.lookup("triple").unwrap().name().ends_with("::triple"));
    }

    #[test]
    fn lookup_reports_missing_and_ambiguous() {
        let registry = StrategyRegistry::new()
            .with(constant("app::a::fast", 1))
            .unwrap()
            .with(constant("app::b::fast", 2))
            .unwrap();

        assert!(matches!(
            registry.lookup("slow"),
            Err(AcError::Hydration(HydrationError::StrategyNotFound { .. }))
        ));
        assert!(matches!(
            registry.lookup("fast"),
            Err(AcError::Hydration(HydrationError::AmbiguousName { .. }))
        ));
        assert!(registry.lookup("app::b::fast").is_ok());
    }

    #[test]
    fn duplicate_registration() {
        let mut registry = StrategyRegistry::new();
        registry.register(triple::strategy()).unwrap();
        // Same declaration obtained twice.
        registry.register(triple::strategy()).unwrap();
        assert_eq!(registry.len(), 1);

        registry.register(constant("app::x", 1)).unwrap();
        assert!(registry.register(constant("app::x", 2)).is_err());
    }

    #[test]
    fn hydrate_attaches_quality() {
        let registry = StrategyRegistry::new().with(triple::strategy()).unwrap();
        let option = registry.hydrate("opt-1", &inbound("triple")).unwrap();
        assert_eq!(option.quality.complexity, 0.25);
        assert_eq!(option.quality.readability, 0.75);
        assert!(option.strategy.name().ends_with("::triple"));
    }

    #[test]
    fn hydrate_requires_name() {
        let registry = StrategyRegistry::new().with(triple::strategy()).unwrap();
        let result = registry.hydrate("opt-1", &InboundExecutable::default());
        assert!(matches!(
            result,
            Err(AcError::Hydration(HydrationError::MissingFragment { .. }))
        ));
    }

    #[test]
    fn hydrate_tolerates_reformatted_source() {
        let registry = StrategyRegistry::new().with(triple::strategy()).unwrap();
        let strategy = registry.lookup("triple").unwrap();
        let mut payload = inbound(strategy.name());
        payload.string = Some(strategy.source().replace(' ', "  "));
        assert!(registry.hydrate("opt-1", &payload).is_ok());
    }

    #[test]
    fn from_space_collects_declared_strategies() {
        let space = SearchSpace::from_variables(vec![
            Variable::choice("algo", vec![constant("app::one", 1), constant("app::two", 2)]).unwrap(),
        ])
        .unwrap();
        let registry = StrategyRegistry::from_space(&space).unwrap();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["app::one", "app::two"]);
    }
}
