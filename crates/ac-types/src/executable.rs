//! Executable strategies: named callables that can be offered as choice
//! options and transmitted to the optimizer by name and source text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::AcResult;
use crate::variable::SearchSpace;

/// Quality scores attached to an executable option.
///
/// Declared options start at zero; the optimizer fills them in during
/// negotiation. They are forwarded as auxiliary signal and carry no local
/// semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    #[serde(default)]
    pub error_potentiality: f64,
    #[serde(default)]
    pub understandability: f64,
    #[serde(default)]
    pub complexity: f64,
    #[serde(default)]
    pub overall_maintainability: f64,
    #[serde(default)]
    pub modularity: f64,
    #[serde(default)]
    pub readability: f64,
}

/// The effective value of a variable within one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ResolvedValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            Self::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    /// Floats, with integers widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
            Self::Boolean(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Json(_) => "json",
        }
    }
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ResolvedValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for ResolvedValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ResolvedValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<serde_json::Value> for ResolvedValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Read access to the evaluation a strategy runs inside.
///
/// Strategies receive the resolver instead of the whole session so they can
/// pull other variables (memoized like any other lookup) without owning any
/// session state.
pub trait ValueResolver: Send + Sync {
    /// Resolve a variable by identifier or name.
    fn resolve(&self, key: &str, args: &[ResolvedValue]) -> AcResult<ResolvedValue>;

    /// The negotiated search space.
    fn search_space(&self) -> &SearchSpace;
}

type StrategyFn =
    dyn Fn(&dyn ValueResolver, &[ResolvedValue]) -> AcResult<ResolvedValue> + Send + Sync;

/// A named, pre-linked callable offered as a choice option.
#[derive(Clone)]
pub struct Strategy {
    name: Arc<str>,
    source: Arc<str>,
    func: Arc<StrategyFn>,
}

impl Strategy {
    pub fn new<F>(name: impl Into<String>, source: impl Into<String>, func: F) -> Self
    where
        F: Fn(&dyn ValueResolver, &[ResolvedValue]) -> AcResult<ResolvedValue>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            source: Arc::from(source.into()),
            func: Arc::new(func),
        }
    }

    /// Fully-qualified name, e.g. `my_crate::strategies::fast_path`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last path segment of the name.
    pub fn simple_name(&self) -> &str {
        simple_name(&self.name)
    }

    /// Source text of the declaration.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn invoke(
        &self,
        resolver: &dyn ValueResolver,
        args: &[ResolvedValue],
    ) -> AcResult<ResolvedValue> {
        (self.func)(resolver, args)
    }

    /// Whether both handles share the same underlying callable.
    pub fn same_callable(&self, other: &Strategy) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.func) as *const (),
            Arc::as_ptr(&other.func) as *const (),
        )
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Last segment of a `::` or `.` separated path.
pub fn simple_name(path: &str) -> &str {
    let tail = path.rsplit("::").next().unwrap_or(path);
    tail.rsplit('.').next().unwrap_or(tail)
}

/// Declare a strategy function together with a `name::strategy()`
/// constructor that captures its fully-qualified name and source text.
///
/// Must be invoked at module level; the generated module refers to the
/// function through `super`.
///
/// ```ignore
/// ac_types::strategy! {
///     pub fn doubled(resolver: &dyn ValueResolver, _args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
///         let x = resolver.resolve("x", &[])?.as_i64().unwrap_or_default();
///         Ok(ResolvedValue::Integer(x * 2))
///     }
/// }
///
/// let option = doubled::strategy();
/// ```
#[macro_export]
macro_rules! strategy {
    ($(#[$meta:meta])* $vis:vis fn $name:ident ($($params:tt)*) -> $ret:ty $body:block) => {
        $(#[$meta])*
        $vis fn $name($($params)*) -> $ret $body

        $vis mod $name {
            pub fn strategy() -> $crate::Strategy {
                $crate::Strategy::new(
                    module_path!(),
                    stringify!(fn $name($($params)*) -> $ret $body),
                    super::$name,
                )
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AcError;

    struct NoResolver(SearchSpace);

    impl ValueResolver for NoResolver {
        fn resolve(&self, key: &str, _args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
            Err(AcError::Internal(format!("no value for {key}")))
        }

        fn search_space(&self) -> &SearchSpace {
            &self.0
        }
    }

    crate::strategy! {
        fn sum_args(_resolver: &dyn ValueResolver, args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
            let total: i64 = args.iter().filter_map(ResolvedValue::as_i64).sum();
            Ok(ResolvedValue::Integer(total))
        }
    }

    #[test]
    fn macro_captures_name_and_source() {
        let strategy = sum_args::strategy();
        assert!(strategy.name().ends_with("::sum_args"));
        assert_eq!(strategy.simple_name(), "sum_args");
        assert!(strategy.source().starts_with("fn sum_args"));
        assert!(strategy.source().contains("filter_map"));
    }

    #[test]
    fn macro_strategy_invokes_function() {
        let resolver = NoResolver(SearchSpace::new());
        let strategy = sum_args::strategy();
        let out = strategy
            .invoke(&resolver, &[ResolvedValue::Integer(2), ResolvedValue::Integer(3)])
            .unwrap();
        assert_eq!(out, ResolvedValue::Integer(5));
    }

    #[test]
    fn callable_identity() {
        let a = Strategy::new("m::a", "fn a() {}", |_, _| Ok(ResolvedValue::Boolean(true)));
        let b = a.clone();
        let c = Strategy::new("m::a", "fn a() {}", |_, _| Ok(ResolvedValue::Boolean(true)));
        assert!(a.same_callable(&b));
        assert!(!a.same_callable(&c));
    }

    #[test]
    fn simple_name_handles_both_separators() {
        assert_eq!(simple_name("crate::module::pick"), "pick");
        assert_eq!(simple_name("main.pick"), "pick");
        assert_eq!(simple_name("pick"), "pick");
    }

    #[test]
    fn resolved_value_accessors() {
        assert_eq!(ResolvedValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(ResolvedValue::Float(3.5).as_i64(), None);
        assert_eq!(ResolvedValue::Json(serde_json::json!(true)).as_bool(), Some(true));
        assert_eq!(ResolvedValue::Float(1.5).to_string(), "1.5");
    }
}
