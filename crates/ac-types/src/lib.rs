//! # ac-types
//!
//! Core types for the autocode optimization client: the search-space model,
//! executable strategies, the canonical wire shapes exchanged with the
//! optimizer, and the error taxonomy shared by every crate in the workspace.

pub mod errors;
pub mod executable;
pub mod variable;
pub mod wire;

pub use errors::*;
pub use executable::*;
pub use variable::*;
pub use wire::*;
