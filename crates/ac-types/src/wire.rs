//! Canonical JSON shapes exchanged with the optimizer.
//!
//! Every variable and value projects onto a [`WireVariable`] / [`WireValue`].
//! Maps are ordered so identical typed input always yields byte-identical
//! JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{AcError, AcResult, HydrationError, ProtocolError};
use crate::executable::QualityScores;
use crate::variable::{
    ExecutableOption, SearchSpace, Value, ValueData, Variable, VariableKind, VALUE_BOOLEAN,
    VALUE_EXECUTABLE, VALUE_FLOAT, VALUE_INTEGER, VARIABLE_BINARY, VARIABLE_CHOICE,
    VARIABLE_INTEGER, VARIABLE_REAL,
};

/// Serialized variable: `{id, name?, type, bounds?, options?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireVariable {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[serde_json::Value; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, WireValue>>,
}

/// Serialized value: `{id, type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireValue {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Executable payload sent to the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundExecutable {
    pub name: String,
    pub string: String,
}

/// Executable payload received from the optimizer. `name` and `string` are
/// only present when the option has to be hydrated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundExecutable {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub string: Option<String>,
    #[serde(flatten)]
    pub quality: QualityScores,
}

impl InboundExecutable {
    pub fn from_data(option_id: &str, data: &serde_json::Value) -> AcResult<Self> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone()).map_err(|e| {
            ProtocolError::InvalidField {
                field: "data".to_string(),
                context: format!("executable option {option_id}"),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Read a transport number as an exact i64. Integral floats (`7.0`) are
/// accepted; fractional or out-of-range values are rejected.
pub fn exact_i64(context: &str, data: &serde_json::Value) -> AcResult<i64> {
    if let Some(v) = data.as_i64() {
        return Ok(v);
    }
    match data.as_f64() {
        Some(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => Ok(v as i64),
        Some(v) => Err(ProtocolError::NonIntegral {
            variable_id: context.to_string(),
            value: v,
        }
        .into()),
        None => Err(invalid(context, "data", format!("expected integer, got {data}"))),
    }
}

pub fn number_f64(context: &str, data: &serde_json::Value) -> AcResult<f64> {
    data.as_f64()
        .ok_or_else(|| invalid(context, "data", format!("expected number, got {data}")))
}

pub fn boolean(context: &str, data: &serde_json::Value) -> AcResult<bool> {
    data.as_bool()
        .ok_or_else(|| invalid(context, "data", format!("expected boolean, got {data}")))
}

fn invalid(context: &str, field: &str, message: String) -> AcError {
    ProtocolError::InvalidField {
        field: field.to_string(),
        context: context.to_string(),
        message,
    }
    .into()
}

fn missing(context: &str, field: &str) -> AcError {
    ProtocolError::MissingField {
        field: field.to_string(),
        context: context.to_string(),
    }
    .into()
}

impl Value {
    pub fn to_wire(&self) -> WireValue {
        let data = match &self.data {
            ValueData::Integer(v) => serde_json::json!(v),
            ValueData::Float(v) => serde_json::json!(v),
            ValueData::Boolean(v) => serde_json::json!(v),
            ValueData::Executable(option) => serde_json::json!(OutboundExecutable {
                name: option.strategy.name().to_string(),
                string: option.strategy.source().to_string(),
            }),
        };
        WireValue {
            id: self.id.clone(),
            type_tag: self.type_tag().to_string(),
            data,
        }
    }

    /// Rebuild a literal value. Executable values are rejected because they
    /// need hydration.
    pub fn literal_from_wire(wire: &WireValue) -> AcResult<Self> {
        let context = format!("option {}", wire.id);
        let data = match wire.type_tag.as_str() {
            VALUE_INTEGER => ValueData::Integer(exact_i64(&wire.id, &wire.data)?),
            VALUE_FLOAT => ValueData::Float(number_f64(&context, &wire.data)?),
            VALUE_BOOLEAN => ValueData::Boolean(boolean(&context, &wire.data)?),
            VALUE_EXECUTABLE => {
                return Err(HydrationError::MissingFragment {
                    option_id: wire.id.clone(),
                }
                .into())
            }
            other => {
                return Err(ProtocolError::UnsupportedValueType {
                    type_tag: other.to_string(),
                }
                .into())
            }
        };
        Ok(Self {
            id: wire.id.clone(),
            data,
        })
    }
}

impl Variable {
    pub fn to_wire(&self) -> WireVariable {
        let (bounds, options) = match &self.kind {
            VariableKind::Binary => (None, None),
            VariableKind::Integer { lower, upper } => {
                (Some([serde_json::json!(lower), serde_json::json!(upper)]), None)
            }
            VariableKind::Real { lower, upper } => {
                (Some([serde_json::json!(lower), serde_json::json!(upper)]), None)
            }
            VariableKind::Choice { options } => (
                None,
                Some(
                    options
                        .iter()
                        .map(|(id, value)| (id.clone(), value.to_wire()))
                        .collect(),
                ),
            ),
        };
        WireVariable {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            type_tag: self.type_tag().to_string(),
            bounds,
            options,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.to_wire())
    }

    /// Rebuild a variable whose options are all literals.
    pub fn from_wire(wire: &WireVariable) -> AcResult<Self> {
        Self::from_wire_with(wire, |option| {
            Err(HydrationError::MissingFragment {
                option_id: option.id.clone(),
            }
            .into())
        })
    }

    /// Rebuild a variable, delegating executable options to `hydrate`.
    pub fn from_wire_with<F>(wire: &WireVariable, mut hydrate: F) -> AcResult<Self>
    where
        F: FnMut(&WireValue) -> AcResult<ExecutableOption>,
    {
        let kind = match wire.type_tag.as_str() {
            VARIABLE_BINARY => VariableKind::Binary,
            VARIABLE_INTEGER => {
                let (lower, upper) = integer_bounds(wire)?;
                VariableKind::Integer { lower, upper }
            }
            VARIABLE_REAL => {
                let (lower, upper) = real_bounds(wire)?;
                VariableKind::Real { lower, upper }
            }
            VARIABLE_CHOICE => {
                let wire_options = wire
                    .options
                    .as_ref()
                    .ok_or_else(|| missing(&format!("variable {}", wire.id), "options"))?;
                let mut options = BTreeMap::new();
                for (id, option) in wire_options {
                    let value = if option.type_tag == VALUE_EXECUTABLE {
                        Value {
                            id: id.clone(),
                            data: ValueData::Executable(hydrate(option)?),
                        }
                    } else {
                        let mut value = Value::literal_from_wire(option)?;
                        value.id = id.clone();
                        value
                    };
                    options.insert(id.clone(), value);
                }
                VariableKind::Choice { options }
            }
            other => {
                return Err(ProtocolError::UnsupportedVariableType {
                    type_tag: other.to_string(),
                }
                .into())
            }
        };
        Ok(Self {
            id: wire.id.clone(),
            name: wire.name.clone().unwrap_or_default(),
            kind,
        })
    }
}

/// Integer bounds of a wire variable, checked for `lower <= upper`.
pub fn integer_bounds(wire: &WireVariable) -> AcResult<(i64, i64)> {
    let context = format!("variable {}", wire.id);
    let [lower, upper] = wire.bounds.as_ref().ok_or_else(|| missing(&context, "bounds"))?;
    let lower = exact_i64(&wire.id, lower)?;
    let upper = exact_i64(&wire.id, upper)?;
    if lower > upper {
        return Err(crate::errors::NegotiationError::InvalidBounds {
            variable_id: wire.id.clone(),
            lower: lower.to_string(),
            upper: upper.to_string(),
        }
        .into());
    }
    Ok((lower, upper))
}

/// Real bounds of a wire variable, checked for `lower <= upper`.
pub fn real_bounds(wire: &WireVariable) -> AcResult<(f64, f64)> {
    let context = format!("variable {}", wire.id);
    let [lower, upper] = wire.bounds.as_ref().ok_or_else(|| missing(&context, "bounds"))?;
    let lower = number_f64(&context, lower)?;
    let upper = number_f64(&context, upper)?;
    if !(lower <= upper) {
        return Err(crate::errors::NegotiationError::InvalidBounds {
            variable_id: wire.id.clone(),
            lower: lower.to_string(),
            upper: upper.to_string(),
        }
        .into());
    }
    Ok((lower, upper))
}

impl SearchSpace {
    pub fn to_wire(&self) -> BTreeMap<String, WireVariable> {
        self.iter()
            .map(|variable| (variable.id.clone(), variable.to_wire()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Body of `POST {server}/apis/optimizations/prepares`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub variables: BTreeMap<String, WireVariable>,
    pub host: String,
    pub port: u16,
    pub name: String,
}

/// Refined search space returned by the optimizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareResponse {
    #[serde(default)]
    pub variables: BTreeMap<String, WireVariable>,
}

/// Body of `POST {client}/apis/optimizations/evaluates/prepares`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluatePrepareRequest {
    pub variable_values: BTreeMap<String, WireValue>,
}

/// Objectives and constraints produced by one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub objectives: Vec<f64>,
    #[serde(default)]
    pub inequality_constraints: Vec<f64>,
    #[serde(default)]
    pub equality_constraints: Vec<f64>,
}

impl EvaluationResult {
    pub fn new(objectives: Vec<f64>) -> Self {
        Self {
            objectives,
            ..Self::default()
        }
    }

    pub fn with_inequality_constraints(mut self, constraints: Vec<f64>) -> Self {
        self.inequality_constraints = constraints;
        self
    }

    pub fn with_equality_constraints(mut self, constraints: Vec<f64>) -> Self {
        self.equality_constraints = constraints;
        self
    }
}

/// Structured error body returned at the request boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

impl From<&AcError> for ErrorResponse {
    fn from(error: &AcError) -> Self {
        Self {
            error: error.to_string(),
            kind: error.kind().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::{ResolvedValue, Strategy};
    use crate::variable::OptionInput;
    use proptest::prelude::*;
    use serde_json::json;

    fn literal_space() -> SearchSpace {
        SearchSpace::from_variables(vec![
            Variable::binary("flag").with_id("b"),
            Variable::integer("x", 0, 10).unwrap().with_id("i"),
            Variable::real("lr", 0.5, 1.5).unwrap().with_id("r"),
            Variable::choice_with_ids(
                "pick",
                vec![
                    ("opA", OptionInput::from(1_i64)),
                    ("opB", OptionInput::from(2.5)),
                    ("opC", OptionInput::from(false)),
                ],
            )
            .unwrap()
            .with_id("c"),
        ])
        .unwrap()
    }

    #[test]
    fn variable_shapes() {
        let space = literal_space();
        assert_eq!(
            space.get("i").unwrap().to_json(),
            json!({"id": "i", "name": "x", "type": "OptimizationInteger", "bounds": [0, 10]})
        );
        assert_eq!(
            space.get("b").unwrap().to_json(),
            json!({"id": "b", "name": "flag", "type": "OptimizationBinary"})
        );
        assert_eq!(
            space.get("c").unwrap().to_json()["options"]["opA"],
            json!({"id": "opA", "type": "int", "data": 1})
        );
    }

    #[test]
    fn executable_outbound_shape() {
        let strategy = Strategy::new("demo::fast", "fn fast() {}", |_, _| {
            Ok(ResolvedValue::Integer(1))
        });
        let choice = Variable::choice_with_ids("algo", vec![("f", strategy)]).unwrap();
        let wire = choice.to_json();
        assert_eq!(
            wire["options"]["f"],
            json!({
                "id": "f",
                "type": "OptimizationValueFunction",
                "data": {"name": "demo::fast", "string": "fn fast() {}"}
            })
        );
    }

    #[test]
    fn serialization_is_stable() {
        let space = literal_space();
        let a = serde_json::to_string(&space.to_wire()).unwrap();
        let b = serde_json::to_string(&space.clone().to_wire()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn literal_variables_round_trip() {
        for variable in literal_space().iter() {
            let wire = variable.to_wire();
            let json = serde_json::to_string(&wire).unwrap();
            let parsed: WireVariable = serde_json::from_str(&json).unwrap();
            let rebuilt = Variable::from_wire(&parsed).unwrap();
            assert_eq!(rebuilt.to_wire(), wire);
        }
    }

    #[test]
    fn from_wire_rejects_unknown_tags() {
        let wire = WireVariable {
            id: "v".into(),
            name: None,
            type_tag: "OptimizationMatrix".into(),
            bounds: None,
            options: None,
        };
        assert!(matches!(
            Variable::from_wire(&wire),
            Err(AcError::Protocol(ProtocolError::UnsupportedVariableType { .. }))
        ));
    }

    #[test]
    fn from_wire_requires_hydration_for_executables() {
        let wire: WireVariable = serde_json::from_value(json!({
            "id": "c",
            "type": "OptimizationChoice",
            "options": {"f": {"id": "f", "type": "OptimizationValueFunction", "data": null}}
        }))
        .unwrap();
        assert!(matches!(
            Variable::from_wire(&wire),
            Err(AcError::Hydration(HydrationError::MissingFragment { .. }))
        ));
    }

    #[test]
    fn integer_bounds_accept_integral_floats() {
        let wire: WireVariable = serde_json::from_value(json!({
            "id": "i", "type": "OptimizationInteger", "bounds": [0.0, 10.0]
        }))
        .unwrap();
        assert_eq!(integer_bounds(&wire).unwrap(), (0, 10));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let wire: WireVariable = serde_json::from_value(json!({
            "id": "r", "type": "OptimizationReal", "bounds": [2.0, 1.0]
        }))
        .unwrap();
        assert!(real_bounds(&wire).is_err());
    }

    #[test]
    fn exact_i64_rejects_fractions() {
        assert_eq!(exact_i64("v", &json!(7)).unwrap(), 7);
        assert_eq!(exact_i64("v", &json!(7.0)).unwrap(), 7);
        assert!(matches!(
            exact_i64("v", &json!(7.5)),
            Err(AcError::Protocol(ProtocolError::NonIntegral { .. }))
        ));
        assert!(exact_i64("v", &json!("7")).is_err());
    }

    #[test]
    fn inbound_executable_defaults_missing_scores() {
        let inbound = InboundExecutable::from_data(
            "f",
            &json!({"complexity": 0.4, "name": "demo::fast", "string": "fn fast() {}"}),
        )
        .unwrap();
        assert_eq!(inbound.quality.complexity, 0.4);
        assert_eq!(inbound.quality.readability, 0.0);
        assert_eq!(inbound.name.as_deref(), Some("demo::fast"));

        let empty = InboundExecutable::from_data("f", &serde_json::Value::Null).unwrap();
        assert!(empty.name.is_none());
    }

    #[test]
    fn evaluation_result_shape() {
        let result = EvaluationResult::new(vec![7.0]);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"objectives": [7.0], "inequality_constraints": [], "equality_constraints": []})
        );
    }

    proptest! {
        #[test]
        fn integer_round_trip_preserves_bounds(a in any::<i64>(), b in any::<i64>()) {
            let (lower, upper) = (a.min(b), a.max(b));
            let variable = Variable::integer("x", lower, upper).unwrap();
            let rebuilt = Variable::from_wire(&variable.to_wire()).unwrap();
            match rebuilt.kind {
                VariableKind::Integer { lower: l, upper: u } => {
                    prop_assert_eq!((l, u), (lower, upper));
                }
                other => prop_assert!(false, "unexpected kind {:?}", other),
            }
        }

        #[test]
        fn real_construction_enforces_order(a in -1e9f64..1e9, b in -1e9f64..1e9) {
            let result = Variable::real("r", a, b);
            prop_assert_eq!(result.is_ok(), a <= b);
        }
    }
}
