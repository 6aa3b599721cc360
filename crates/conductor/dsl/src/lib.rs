//! Pipeline definition DSL
//!
//! A small declarative language for workflow definitions: stages with
//! executors, retry and confidence settings, escalation ladders, and
//! guarded edges with fan-out and join policies. Compiles to the same
//! validated [`conductor_types::WorkflowDefinition`] the programmatic
//! builder produces.
//!
//! ```text
//! PIPELINE "product_build" {
//!     STAGE market { EXECUTOR market_validation RETRY 3 }
//!     STAGE deploy { EXECUTOR deployer }
//!     ENTRY market
//!     TERMINAL deploy
//!     EDGES {
//!         market -> deploy ON market.viability == "high"
//!     }
//! }
//! ```

pub mod compiler;
pub mod errors;
pub mod lexer;
pub mod parser;

pub use compiler::{compile, compile_pipeline};
pub use errors::{DslError, DslResult};
pub use parser::{ParsedEdge, ParsedPipeline, ParsedStage, Parser};
