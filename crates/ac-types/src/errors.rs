use thiserror::Error;

/// Main error type for the autocode optimization client
#[derive(Error, Debug)]
pub enum AcError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Hydration error: {0}")]
    Hydration(#[from] HydrationError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AcError {
    /// Stable, machine-readable label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Negotiation(_) => "negotiation",
            Self::Hydration(_) => "hydration",
            Self::Resolution(_) => "resolution",
            Self::Evaluation(EvaluationError::InFlight { .. }) => "evaluation_in_flight",
            Self::Evaluation(EvaluationError::NotPrepared) => "evaluation_not_prepared",
            Self::Evaluation(_) => "evaluation",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
            Self::Validation(_) => "validation",
        }
    }
}

/// Malformed payloads and unsupported kind tags
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unsupported variable type: {type_tag}")]
    UnsupportedVariableType { type_tag: String },

    #[error("Unsupported value type: {type_tag}")]
    UnsupportedValueType { type_tag: String },

    #[error("Missing field `{field}` in {context}")]
    MissingField { field: String, context: String },

    #[error("Invalid field `{field}` in {context}: {message}")]
    InvalidField {
        field: String,
        context: String,
        message: String,
    },

    #[error("Kind mismatch for {id}: declared {declared}, received {received}")]
    KindMismatch {
        id: String,
        declared: String,
        received: String,
    },

    #[error("Value for {variable_id} is not an exact integer: {value}")]
    NonIntegral { variable_id: String, value: f64 },

    #[error("Malformed request: {message}")]
    Malformed { message: String },
}

/// Failures of the Prepare round trip
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Optimizer rejected prepare with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport failure talking to {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Invalid bounds for {variable_id}: lower {lower} exceeds upper {upper}")]
    InvalidBounds {
        variable_id: String,
        lower: String,
        upper: String,
    },
}

/// Failures turning a transmitted strategy into a live callable
#[derive(Error, Debug)]
pub enum HydrationError {
    #[error("Option {option_id} requires hydration but carries no strategy name")]
    MissingFragment { option_id: String },

    #[error("Strategy not found: {name}")]
    StrategyNotFound { name: String },

    #[error("Strategy name {name} is ambiguous: {candidates:?}")]
    AmbiguousName {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Strategy {name} is already registered with a different implementation")]
    DuplicateRegistration { name: String },
}

/// Failures while resolving a variable inside one evaluation
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Variable not found: {key}")]
    VariableNotFound { key: String },

    #[error("Variable value not found: {variable_id}")]
    ValueNotFound { variable_id: String },

    #[error("Option {option_id} not found in choice {variable_id}")]
    OptionNotFound {
        variable_id: String,
        option_id: String,
    },

    #[error("Option {option_id} of {variable_id} is not executable")]
    NotExecutable {
        variable_id: String,
        option_id: String,
    },

    #[error("Variable {variable_id} is not a choice")]
    NotAChoice { variable_id: String },

    #[error("Cyclic resolution of {variable_id}")]
    Cycle { variable_id: String },

    #[error("Variable {variable_id} resolved to {actual}, expected {expected}")]
    TypeMismatch {
        variable_id: String,
        expected: String,
        actual: String,
    },

    #[error("Strategy {strategy} failed: {message}")]
    StrategyFailed { strategy: String, message: String },
}

/// Violations of the one-evaluation-in-flight protocol and objective failures
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Evaluation {evaluation_id} is already running")]
    InFlight { evaluation_id: String },

    #[error("No evaluation has been prepared")]
    NotPrepared,

    #[error("Objective function failed: {message}")]
    Failed { message: String },
}

/// Result type alias for autocode operations
pub type AcResult<T> = Result<T, AcError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::AcError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AcError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AcError::Config(format!($($arg)*))
    };
}
