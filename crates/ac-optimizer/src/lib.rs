//! # ac-optimizer
//!
//! Client-side orchestration for distributed black-box optimization.
//!
//! Declares a search space, negotiates it with the optimizer, hydrates
//! executable options from the linked strategy registry, and resolves
//! variables lazily and at most once per evaluation.

mod config;
mod negotiation;
mod registry;
mod resolver;
mod session;

pub use config::{
    ClientConfig, ENV_BIND_HOST, ENV_CLIENT_HOST, ENV_CLIENT_NAME, ENV_CLIENT_PORT,
    ENV_MAX_BODY_BYTES, ENV_SERVER_HOST, ENV_SERVER_PORT,
};
pub use negotiation::{merge_refined, HttpNegotiator, MergeReport, Negotiator, Optimization};
pub use registry::StrategyRegistry;
pub use resolver::{AssignedValue, Assignment, Evaluation};
pub use session::{Application, EvaluationState, Session};
