//! # pdfjs-fuzzgen
//!
//! Grammar-driven generation of JavaScript API-call test cases for the
//! scripting engines embedded in PDF readers.
//!
//! Every API of a scripting object is described on disk by its parameter
//! grammars. Expanded values are normalized into JavaScript literals,
//! occasionally swapped for adversarial counterfactuals, and rendered into
//! guarded call statements. A relation engine links consecutive calls through
//! weak co-occurrence tables and symbolic constraints solved with Z3, and
//! can wrap parameters in coercion and getter hooks.

pub mod api;
pub mod catalog;
pub mod codegen;
pub mod config;
pub mod counterfactual;
pub mod grammar;
pub mod normalize;
pub mod object;
pub mod relations;
pub mod session;
pub mod statement;
pub mod symbolic;

// Re-export core types for easy access
pub use api::{ApiConfigError, ApiDescriptor, ApiGenerator, ApiKind, RawCall};
pub use catalog::{load_catalog, CatalogError, CatalogResult};
pub use codegen::{CodeGenerator, GenerationError, GenerationResult, GenerationStats};
pub use config::{EngineFlavor, GeneratorConfig, InstanceTable, RelationPolicy};
pub use grammar::{ExpansionContext, ExpansionError, Grammar};
pub use normalize::{normalize_generated_value, ValueNormalizer};
pub use object::{InstancePool, ObjectGenerator};
pub use relations::{RelationConfig, SymbolicRelation, SymbolicRelations, WeakRelations};
pub use session::{FuzzSession, SessionConfig, SessionError, SessionSummary, TestCase, TestCaseWriter};
pub use statement::{build_statement_from_raw_call, construct_statement};
pub use symbolic::{solve, ConstraintKind, Solution, SolverBudget, SolverError};
