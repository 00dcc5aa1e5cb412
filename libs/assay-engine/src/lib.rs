//! Multi-environment exercise execution and answer validation.
//!
//! **Layout:**
//! - [`equivalence`]: tolerance-aware comparison shared by every validator
//! - [`service`]: the uniform `ExecutionService` contract
//! - [`registry`]: environment tag → service constructor
//! - [`code`], [`sql`], [`notebook`]: executing environments
//! - [`validators`]: static, non-executing validators
//!
//! Every `execute` call is stateless; services can be shared across tasks.

pub mod code;
pub mod equivalence;
pub mod error;
pub mod notebook;
pub mod registry;
pub mod service;
pub mod sql;
pub mod validators;

pub use error::EngineError;
pub use registry::ServiceRegistry;
pub use service::ExecutionService;
