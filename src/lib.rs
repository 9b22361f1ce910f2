//! # cypherlite — Cypher query engine with two back-ends
//!
//! Parses openCypher statements and either executes them against an in-memory
//! property-graph store, or lowers them to parameterised SQL over a
//! normalised relational schema (`nodes`, `relationships`) whose properties
//! live in JSON columns.
//!
//! ## Design Principles
//!
//! 1. **Parser owns nothing**: Cypher → AST is a pure function
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross all boundaries
//! 3. **The store owns every record**: reads return clones, writes go through
//!    `&mut` methods that keep indexes synchronized
//! 4. **Parameterised SQL only**: user values never appear inline in
//!    generated SQL
//!
//! ## Quick Start
//!
//! ```rust
//! use cypherlite::{Graph, PropertyMap, Value};
//!
//! # fn example() -> cypherlite::Result<()> {
//! let mut graph = Graph::new();
//!
//! let mut params = PropertyMap::new();
//! params.insert("name".into(), Value::from("Ada"));
//! graph.execute("CREATE (n:Person {name: $name})", &params)?;
//!
//! let result = graph.execute("MATCH (n:Person) RETURN n.name", &PropertyMap::new())?;
//! assert_eq!(result.get::<String>(0, "n.name")?, "Ada");
//!
//! // Same AST, lowered to SQL instead of executed
//! let sql = graph.to_sql("MATCH (n:Person) RETURN n.name", &PropertyMap::new())?;
//! assert!(sql.sql.starts_with("SELECT"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cypher;
pub mod storage;
pub mod execution;
pub mod sql;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{Node, NodeId, PropertyMap, RelId, Relationship, Value};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{GraphStore, IndexDef};

// ============================================================================
// Re-exports: Execution / SQL
// ============================================================================

pub use execution::{FromValue, QueryResult, Summary};
pub use sql::SqlQuery;

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` owns an in-memory store and provides
/// Cypher execution plus SQL generation.
pub struct Graph {
    store: GraphStore,
}

impl Graph {
    pub fn new() -> Self {
        Self { store: GraphStore::new() }
    }

    /// Parse and execute a Cypher query against the in-memory store.
    pub fn execute(&mut self, query: &str, params: &PropertyMap) -> Result<QueryResult> {
        let ast = cypher::parse(query)?;
        execution::execute_query(&mut self.store, &ast, params)
    }

    /// Parse a Cypher query and lower it to parameterised SQL. The store is
    /// not touched; the generated SQL targets the relational schema.
    pub fn to_sql(&self, query: &str, params: &PropertyMap) -> Result<SqlQuery> {
        let ast = cypher::parse(query)?;
        sql::generate(&ast, params)
    }

    /// Direct access to the underlying store.
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Mutable access to the underlying store.
    pub fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Lex error at line {line}, column {column}: {message}")]
    LexError { line: u32, column: u32, message: String },

    #[error("Parse error at line {line}, column {column}: {message}")]
    ParseError { line: u32, column: u32, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Unsupported construct in SQL generation: {0}")]
    UnsupportedConstruct(String),
}

pub type Result<T> = std::result::Result<T, Error>;
