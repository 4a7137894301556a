//! # READMEs Engine
//!
//! Turns a structured markdown document into an executable program. The document declares
//! functions, templates (code fragments), and warmholes (navigation states); the engine parses
//! them, runs them against caller input, and moves between warmholes, optionally letting an
//! external decision service (a language model) judge transitions and plan work.
//!
//! ## Usage
//!
//! ```rust
//! use readmes_engine::Session;
//! use serde_json::json;
//!
//! let document = r#"
//! ## Function: shout
//! - description: "Uppercases text"
//! - input: text: string
//! - output: result: string
//! - template: upper
//!
//! ## Template: upper
//! - input_placeholder: "{{text}}"
//! - transform: |
//!     return context.text.toUpperCase();
//! - output_format: string
//! "#;
//!
//! let mut session = Session::in_memory();
//! session.init(document)?;
//! let context = json!({"input": "hello"}).as_object().cloned().unwrap_or_default();
//! let result = session.execute("shout", &context)?;
//! assert_eq!(result.value(), Some(&json!("HELLO")));
//! # Ok::<(), readmes_engine::EngineError>(())
//! ```
//!
//! ## Architecture
//!
//! - **`document`**: definition parser and header index
//! - **`state`**: the per-session [`SystemState`] and its snapshot form
//! - **`template`** / **`sandbox`**: placeholder pre-pass and the restricted evaluator
//! - **`executor`**: function/template resolution and execution
//! - **`navigator`**: warmhole state machine, static or decision-guided
//! - **`plan`** / **`optimize`**: plan interpretation and in-place warmhole optimization
//! - **`decision`**: decision service adapter and transports
//! - **`session`**: the facade tying the pieces to a snapshot store

pub mod decision;
pub mod document;
pub mod error;
pub mod executor;
pub mod navigator;
pub mod optimize;
pub mod plan;
pub mod sandbox;
pub mod session;
pub mod state;
pub mod template;

pub use decision::{CommandTransport, ConditionVerdict, DecisionAdapter, DecisionTransport, HttpTransport, ScriptedTransport};
pub use document::{ParsedDocument, parse_document};
pub use error::EngineError;
pub use executor::ExecutionEngine;
pub use navigator::{NavigationMode, Navigator};
pub use plan::PlanInterpreter;
pub use sandbox::{EvalError, Evaluator, HostCalls, ScriptEvaluator};
pub use session::{Description, Session};
pub use state::SystemState;
