//! Per-evaluation value resolution.
//!
//! An [`Evaluation`] pairs the negotiated search space with one assignment
//! pushed by the optimizer. Every variable resolves at most once per
//! evaluation: the first lookup computes the effective value (running the
//! assigned strategy for executable options) and later lookups return the
//! cached result, ignoring their arguments.

use chrono::{DateTime, Utc};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use ac_types::{
    boolean, exact_i64, number_f64, AcResult, EvaluatePrepareRequest, OptionId, ProtocolError,
    ResolutionError, ResolvedValue, SearchSpace, ValueResolver, VariableId, VariableKind,
    VALUE_BOOLEAN, VALUE_EXECUTABLE, VALUE_FLOAT, VALUE_INTEGER,
};

/// A value assigned by the optimizer, decoded from its transport form.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignedValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// The chosen executable option of a choice variable.
    Executable { option_id: OptionId },
}

/// Variable id → assigned value for one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    values: BTreeMap<VariableId, AssignedValue>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `variable_values`. Transport floats tagged `int` must be
    /// integral.
    pub fn from_wire(request: &EvaluatePrepareRequest) -> AcResult<Self> {
        let mut values = BTreeMap::new();
        for (variable_id, wire) in &request.variable_values {
            let context = format!("value of {variable_id}");
            let value = match wire.type_tag.as_str() {
                VALUE_INTEGER => AssignedValue::Integer(exact_i64(variable_id, &wire.data)?),
                VALUE_FLOAT => AssignedValue::Float(number_f64(&context, &wire.data)?),
                VALUE_BOOLEAN => AssignedValue::Boolean(boolean(&context, &wire.data)?),
                VALUE_EXECUTABLE => AssignedValue::Executable {
                    option_id: wire.id.clone(),
                },
                other => {
                    return Err(ProtocolError::UnsupportedValueType {
                        type_tag: other.to_string(),
                    }
                    .into())
                }
            };
            values.insert(variable_id.clone(), value);
        }
        Ok(Self { values })
    }

    pub fn with(mut self, variable_id: impl Into<VariableId>, value: AssignedValue) -> Self {
        self.values.insert(variable_id.into(), value);
        self
    }

    pub fn get(&self, variable_id: &str) -> Option<&AssignedValue> {
        self.values.get(variable_id)
    }

    pub fn contains(&self, variable_id: &str) -> bool {
        self.values.contains_key(variable_id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Default)]
struct ResolutionState {
    cache: HashMap<VariableId, ResolvedValue>,
    in_progress: HashSet<VariableId>,
}

/// Clears the in-progress mark of a variable, also when its strategy panics.
struct InProgress<'a> {
    state: &'a RefCell<ResolutionState>,
    variable_id: &'a str,
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.state.borrow_mut().in_progress.remove(self.variable_id);
    }
}

/// Request-scoped resolution context handed to the objective function.
///
/// Resolution is serialized by a re-entrant lock: a strategy may resolve
/// other variables from the same thread, while concurrent callers on other
/// threads wait until the current resolution completes.
pub struct Evaluation {
    id: Uuid,
    prepared_at: DateTime<Utc>,
    space: Arc<SearchSpace>,
    assignment: Assignment,
    state: ReentrantMutex<RefCell<ResolutionState>>,
}

impl Evaluation {
    pub fn new(space: Arc<SearchSpace>, assignment: Assignment) -> Self {
        Self {
            id: Uuid::new_v4(),
            prepared_at: Utc::now(),
            space,
            assignment,
            state: ReentrantMutex::new(RefCell::new(ResolutionState::default())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prepared_at(&self) -> DateTime<Utc> {
        self.prepared_at
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Number of variables resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.state.lock().borrow().cache.len()
    }

    /// Resolve a variable by identifier or name.
    pub fn resolve(&self, key: &str, args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
        let variable_id = self.variable_id(key)?;

        let guard = self.state.lock();
        if let Some(value) = guard.borrow().cache.get(&variable_id) {
            return Ok(value.clone());
        }
        if !guard.borrow_mut().in_progress.insert(variable_id.clone()) {
            return Err(ResolutionError::Cycle { variable_id }.into());
        }

        // No RefCell borrow is held here: strategies may re-enter `resolve`.
        let marker = InProgress {
            state: &guard,
            variable_id: &variable_id,
        };
        let result = self.compute(&variable_id, args);
        drop(marker);

        if let Ok(value) = &result {
            guard.borrow_mut().cache.insert(variable_id, value.clone());
        }
        result
    }

    pub fn resolve_i64(&self, key: &str) -> AcResult<i64> {
        let value = self.resolve(key, &[])?;
        value.as_i64().ok_or_else(|| mismatch(key, "integer", &value))
    }

    pub fn resolve_f64(&self, key: &str) -> AcResult<f64> {
        let value = self.resolve(key, &[])?;
        value.as_f64().ok_or_else(|| mismatch(key, "float", &value))
    }

    pub fn resolve_bool(&self, key: &str) -> AcResult<bool> {
        let value = self.resolve(key, &[])?;
        value.as_bool().ok_or_else(|| mismatch(key, "boolean", &value))
    }

    fn variable_id(&self, key: &str) -> AcResult<VariableId> {
        if let Some(variable) = self.space.find(key) {
            return Ok(variable.id.clone());
        }
        if self.assignment.contains(key) {
            return Ok(key.to_string());
        }
        Err(ResolutionError::VariableNotFound {
            key: key.to_string(),
        }
        .into())
    }

    fn compute(&self, variable_id: &str, args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
        let assigned = self
            .assignment
            .get(variable_id)
            .ok_or_else(|| ResolutionError::ValueNotFound {
                variable_id: variable_id.to_string(),
            })?;
        let declared = self.space.get(variable_id).map(|v| &v.kind);

        match (assigned, declared) {
            (AssignedValue::Executable { option_id }, _) => self.invoke(variable_id, option_id, args),
            (AssignedValue::Integer(v), Some(VariableKind::Real { .. })) => {
                Ok(ResolvedValue::Float(*v as f64))
            }
            (AssignedValue::Float(v), Some(VariableKind::Integer { .. })) => {
                let exact = exact_i64(variable_id, &serde_json::json!(v))?;
                Ok(ResolvedValue::Integer(exact))
            }
            (AssignedValue::Boolean(_), Some(VariableKind::Integer { .. } | VariableKind::Real { .. }))
            | (
                AssignedValue::Integer(_) | AssignedValue::Float(_),
                Some(VariableKind::Binary),
            ) => Err(ResolutionError::TypeMismatch {
                variable_id: variable_id.to_string(),
                expected: declared.map(VariableKind::type_tag).unwrap_or_default().to_string(),
                actual: format!("{assigned:?}"),
            }
            .into()),
            (AssignedValue::Integer(v), _) => Ok(ResolvedValue::Integer(*v)),
            (AssignedValue::Float(v), _) => Ok(ResolvedValue::Float(*v)),
            (AssignedValue::Boolean(v), _) => Ok(ResolvedValue::Boolean(*v)),
        }
    }

    fn invoke(
        &self,
        variable_id: &str,
        option_id: &str,
        args: &[ResolvedValue],
    ) -> AcResult<ResolvedValue> {
        let variable = self
            .space
            .get(variable_id)
            .ok_or_else(|| ResolutionError::VariableNotFound {
                key: variable_id.to_string(),
            })?;
        let options = variable
            .options()
            .ok_or_else(|| ResolutionError::NotAChoice {
                variable_id: variable_id.to_string(),
            })?;
        let option = options
            .get(option_id)
            .ok_or_else(|| ResolutionError::OptionNotFound {
                variable_id: variable_id.to_string(),
                option_id: option_id.to_string(),
            })?;
        let executable = option
            .as_executable()
            .ok_or_else(|| ResolutionError::NotExecutable {
                variable_id: variable_id.to_string(),
                option_id: option_id.to_string(),
            })?;

        debug!(
            evaluation = %self.id,
            variable = %variable_id,
            strategy = %executable.strategy.name(),
            "invoking strategy"
        );
        executable.strategy.invoke(self, args)
    }
}

fn mismatch(key: &str, expected: &str, value: &ResolvedValue) -> ac_types::AcError {
    ResolutionError::TypeMismatch {
        variable_id: key.to_string(),
        expected: expected.to_string(),
        actual: value.kind_name().to_string(),
    }
    .into()
}

impl ValueResolver for Evaluation {
    fn resolve(&self, key: &str, args: &[ResolvedValue]) -> AcResult<ResolvedValue> {
        Evaluation::resolve(self, key, args)
    }

    fn search_space(&self) -> &SearchSpace {
        &self.space
    }
}

impl std::fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluation")
            .field("id", &self.id)
            .field("prepared_at", &self.prepared_at)
            .field("assignment", &self.assignment)
            .finish_non_exhaustive()
    }
}
