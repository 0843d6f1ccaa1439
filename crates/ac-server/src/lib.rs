//! # ac-server
//!
//! HTTP surface of the autocode client. After negotiation the optimizer
//! drives evaluations through two endpoints: evaluate-prepare installs an
//! assignment, evaluate-run invokes the objective and returns its result.

mod http;
mod server;

pub use server::{prepare_and_serve, EvaluateServer, HEALTH_PATH, PREPARE_PATH, RUN_PATH};
