//! Search-space dimensions and the values a dimension can take.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{AcError, AcResult};
use crate::executable::{QualityScores, Strategy};
use crate::validation_error;

/// Stable identifier of a variable; never changes once assigned.
pub type VariableId = String;

/// Identifier of an option within a choice.
pub type OptionId = String;

pub const VARIABLE_BINARY: &str = "OptimizationBinary";
pub const VARIABLE_INTEGER: &str = "OptimizationInteger";
pub const VARIABLE_REAL: &str = "OptimizationReal";
pub const VARIABLE_CHOICE: &str = "OptimizationChoice";
pub const VALUE_EXECUTABLE: &str = "OptimizationValueFunction";
pub const VALUE_BOOLEAN: &str = "bool";
pub const VALUE_INTEGER: &str = "int";
pub const VALUE_FLOAT: &str = "float";

/// One dimension of the search space.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VariableId,
    /// Human-readable label (e.g. "learning_rate").
    pub name: String,
    pub kind: VariableKind,
}

#[derive(Debug, Clone)]
pub enum VariableKind {
    Binary,
    /// Inclusive integer range.
    Integer { lower: i64, upper: i64 },
    /// Continuous range.
    Real { lower: f64, upper: f64 },
    /// Closed set of alternatives keyed by option id.
    Choice { options: BTreeMap<OptionId, Value> },
}

impl VariableKind {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Binary => VARIABLE_BINARY,
            Self::Integer { .. } => VARIABLE_INTEGER,
            Self::Real { .. } => VARIABLE_REAL,
            Self::Choice { .. } => VARIABLE_CHOICE,
        }
    }
}

/// Raw option handed to [`Variable::choice`] before it is classified into a
/// [`Value`].
#[derive(Debug, Clone)]
pub enum OptionInput {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Executable(Strategy),
}

impl From<bool> for OptionInput {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for OptionInput {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for OptionInput {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Strategy> for OptionInput {
    fn from(value: Strategy) -> Self {
        Self::Executable(value)
    }
}

impl Variable {
    fn with_kind(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
        }
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::with_kind(name, VariableKind::Binary)
    }

    pub fn integer(name: impl Into<String>, lower: i64, upper: i64) -> AcResult<Self> {
        let name = name.into();
        if lower > upper {
            return Err(validation_error!(
                "integer variable {name}: lower bound {lower} exceeds upper bound {upper}"
            ));
        }
        Ok(Self::with_kind(name, VariableKind::Integer { lower, upper }))
    }

    pub fn real(name: impl Into<String>, lower: f64, upper: f64) -> AcResult<Self> {
        let name = name.into();
        // `!(lower <= upper)` also rejects NaN bounds.
        if !(lower <= upper) {
            return Err(validation_error!(
                "real variable {name}: lower bound {lower} exceeds upper bound {upper}"
            ));
        }
        Ok(Self::with_kind(name, VariableKind::Real { lower, upper }))
    }

    /// Build a choice, generating a fresh id for every option. Executable
    /// options start with zeroed quality scores.
    pub fn choice<I, O>(name: impl Into<String>, options: I) -> AcResult<Self>
    where
        I: IntoIterator<Item = O>,
        O: Into<OptionInput>,
    {
        Self::choice_with_ids(
            name,
            options
                .into_iter()
                .map(|option| (Uuid::new_v4().to_string(), option)),
        )
    }

    /// Build a choice with caller-supplied option ids.
    pub fn choice_with_ids<I, K, O>(name: impl Into<String>, options: I) -> AcResult<Self>
    where
        I: IntoIterator<Item = (K, O)>,
        K: Into<OptionId>,
        O: Into<OptionInput>,
    {
        let name = name.into();
        let mut values = BTreeMap::new();
        for (id, option) in options {
            let value = Value::from_input(id.into(), option.into());
            if values.contains_key(&value.id) {
                return Err(validation_error!(
                    "choice variable {name}: duplicate option id {}",
                    value.id
                ));
            }
            values.insert(value.id.clone(), value);
        }
        Ok(Self::with_kind(name, VariableKind::Choice { options: values }))
    }

    /// Replace the generated identifier.
    pub fn with_id(mut self, id: impl Into<VariableId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind.type_tag()
    }

    pub fn options(&self) -> Option<&BTreeMap<OptionId, Value>> {
        match &self.kind {
            VariableKind::Choice { options } => Some(options),
            _ => None,
        }
    }
}

/// A concrete instance of a variable's type.
#[derive(Debug, Clone)]
pub struct Value {
    pub id: OptionId,
    pub data: ValueData,
}

#[derive(Debug, Clone)]
pub enum ValueData {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Executable(ExecutableOption),
}

impl ValueData {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Integer(_) => VALUE_INTEGER,
            Self::Float(_) => VALUE_FLOAT,
            Self::Boolean(_) => VALUE_BOOLEAN,
            Self::Executable(_) => VALUE_EXECUTABLE,
        }
    }
}

impl Value {
    pub fn from_input(id: impl Into<OptionId>, input: OptionInput) -> Self {
        let data = match input {
            OptionInput::Boolean(v) => ValueData::Boolean(v),
            OptionInput::Integer(v) => ValueData::Integer(v),
            OptionInput::Float(v) => ValueData::Float(v),
            OptionInput::Executable(strategy) => {
                ValueData::Executable(ExecutableOption::new(strategy))
            }
        };
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.data.type_tag()
    }

    pub fn as_executable(&self) -> Option<&ExecutableOption> {
        match &self.data {
            ValueData::Executable(option) => Some(option),
            _ => None,
        }
    }
}

/// An executable choice option: the callable plus its quality scores.
#[derive(Debug, Clone)]
pub struct ExecutableOption {
    pub strategy: Strategy,
    pub quality: QualityScores,
}

impl ExecutableOption {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            quality: QualityScores::default(),
        }
    }

    pub fn with_quality(mut self, quality: QualityScores) -> Self {
        self.quality = quality;
        self
    }
}

/// The full search space, keyed by variable id.
#[derive(Debug, Clone, Default)]
pub struct SearchSpace {
    variables: BTreeMap<VariableId, Variable>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a space, rejecting duplicate identifiers.
    pub fn from_variables(variables: impl IntoIterator<Item = Variable>) -> AcResult<Self> {
        let mut space = Self::new();
        for variable in variables {
            space.insert(variable)?;
        }
        Ok(space)
    }

    pub fn insert(&mut self, variable: Variable) -> AcResult<()> {
        if self.variables.contains_key(&variable.id) {
            return Err(AcError::Validation(format!(
                "duplicate variable id {} ({})",
                variable.id, variable.name
            )));
        }
        self.variables.insert(variable.id.clone(), variable);
        Ok(())
    }

    /// Insert or overwrite; used when merging a refined space.
    pub fn upsert(&mut self, variable: Variable) {
        self.variables.insert(variable.id.clone(), variable);
    }

    pub fn get(&self, id: &str) -> Option<&Variable> {
        self.variables.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Variable> {
        self.variables.get_mut(id)
    }

    /// Look up by identifier, falling back to a scan over names. Duplicate
    /// names resolve to whichever variable sorts first by id.
    pub fn find(&self, key: &str) -> Option<&Variable> {
        self.variables
            .get(key)
            .or_else(|| self.variables.values().find(|v| v.name == key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// All executable strategies declared anywhere in the space.
    pub fn strategies(&self) -> impl Iterator<Item = &Strategy> {
        self.variables
            .values()
            .filter_map(Variable::options)
            .flat_map(|options| options.values())
            .filter_map(Value::as_executable)
            .map(|option| &option.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::ResolvedValue;

    fn noop(name: &str) -> Strategy {
        Strategy::new(name, "fn noop() {}", |_, _| Ok(ResolvedValue::Integer(0)))
    }

    #[test]
    fn integer_bounds_validated() {
        assert!(Variable::integer("x", 0, 10).is_ok());
        assert!(Variable::integer("x", 5, 5).is_ok());
        assert!(Variable::integer("x", 11, 10).is_err());
    }

    #[test]
    fn real_bounds_validated() {
        assert!(Variable::real("lr", 0.001, 1.0).is_ok());
        assert!(Variable::real("lr", 1.0, 0.0).is_err());
        assert!(Variable::real("lr", f64::NAN, 1.0).is_err());
    }

    #[test]
    fn choice_classifies_options() {
        let choice = Variable::choice_with_ids(
            "pick",
            vec![
                ("a", OptionInput::from(1_i64)),
                ("b", OptionInput::from(2.5)),
                ("c", OptionInput::from(true)),
                ("d", OptionInput::from(noop("m::d"))),
            ],
        )
        .unwrap();

        let options = choice.options().unwrap();
        assert_eq!(options["a"].type_tag(), VALUE_INTEGER);
        assert_eq!(options["b"].type_tag(), VALUE_FLOAT);
        assert_eq!(options["c"].type_tag(), VALUE_BOOLEAN);
        let executable = options["d"].as_executable().unwrap();
        assert_eq!(executable.quality, QualityScores::default());
    }

    #[test]
    fn choice_generates_unique_option_ids() {
        let choice = Variable::choice("pick", vec![1_i64, 2, 3]).unwrap();
        assert_eq!(choice.options().unwrap().len(), 3);
    }

    #[test]
    fn choice_rejects_duplicate_option_ids() {
        let result = Variable::choice_with_ids("pick", vec![("a", 1_i64), ("a", 2_i64)]);
        assert!(result.is_err());
    }

    #[test]
    fn search_space_rejects_duplicate_ids() {
        let result = SearchSpace::from_variables(vec![
            Variable::binary("a").with_id("v1"),
            Variable::binary("b").with_id("v1"),
        ]);
        assert!(matches!(result, Err(AcError::Validation(_))));
    }

    #[test]
    fn find_by_id_then_name() {
        let space = SearchSpace::from_variables(vec![
            Variable::integer("x", 0, 10).unwrap().with_id("v1"),
            Variable::binary("flag").with_id("v2"),
        ])
        .unwrap();

        assert_eq!(space.find("v1").unwrap().name, "x");
        assert_eq!(space.find("flag").unwrap().id, "v2");
        assert!(space.find("missing").is_none());
    }

    #[test]
    fn strategies_iterates_executable_options() {
        let space = SearchSpace::from_variables(vec![
            Variable::choice(
                "pick",
                vec![OptionInput::from(noop("m::a")), OptionInput::from(3_i64)],
            )
            .unwrap(),
            Variable::choice("other", vec![noop("m::b")]).unwrap(),
        ])
        .unwrap();

        let mut names: Vec<&str> = space.strategies().map(Strategy::name).collect();
        names.sort();
        assert_eq!(names, vec!["m::a", "m::b"]);
    }
}
