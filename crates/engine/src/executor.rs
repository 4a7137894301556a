//! Execution engine: resolves a name to a function or template, substitutes placeholders, and
//! runs the transform body through the sandboxed evaluator.

use std::sync::Arc;

use readmes_types::{ExecutionResult, FunctionDef, TemplateDef};
use readmes_util::config::DEFAULT_MAX_CALL_DEPTH;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::sandbox::{EvalError, Evaluator, HostCalls, ScriptEvaluator, StepMeter};
use crate::state::SystemState;
use crate::template::substitute_placeholders;

/// Runs functions and templates against a read-only view of the system state.
#[derive(Clone)]
pub struct ExecutionEngine {
    evaluator: Arc<dyn Evaluator>,
    max_call_depth: usize,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(Arc::new(ScriptEvaluator::default()), DEFAULT_MAX_CALL_DEPTH)
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine").field("max_call_depth", &self.max_call_depth).finish()
    }
}

impl ExecutionEngine {
    pub fn new(evaluator: Arc<dyn Evaluator>, max_call_depth: usize) -> Self {
        Self { evaluator, max_call_depth }
    }

    /// Executes `name` with `context`.
    ///
    /// Functions win over templates when both share a name. An unknown name, or a function
    /// whose template is missing, is an error; anything that goes wrong inside the transform
    /// body is returned as [`ExecutionResult::Error`]. One step budget covers the body and
    /// every `execute` call it makes.
    pub fn execute(&self, state: &SystemState, name: &str, context: &Map<String, Value>) -> Result<ExecutionResult> {
        let meter = StepMeter::new(self.evaluator.step_limit());
        let result = self.execute_at_depth(state, name, context, Frame { depth: 0, meter: &meter });
        debug!(name, steps = meter.used(), limit = meter.limit(), "execution finished");
        result
    }

    fn execute_at_depth(&self, state: &SystemState, name: &str, context: &Map<String, Value>, frame: Frame<'_>) -> Result<ExecutionResult> {
        if let Some(function) = state.functions.get(name) {
            return self.execute_function(state, function, context, frame);
        }
        if let Some(template) = state.templates.get(name) {
            return Ok(self.execute_template(state, template, context, frame));
        }
        Err(EngineError::UnknownName(name.to_string()))
    }

    fn execute_function(&self, state: &SystemState, function: &FunctionDef, context: &Map<String, Value>, frame: Frame<'_>) -> Result<ExecutionResult> {
        let template = state.templates.get(&function.template).ok_or_else(|| EngineError::TemplateNotFound {
            template: function.template.clone(),
            function: function.name.clone(),
        })?;
        let merged = function_context(function, context);
        Ok(self.execute_template(state, template, &merged, frame))
    }

    fn execute_template(&self, state: &SystemState, template: &TemplateDef, context: &Map<String, Value>, frame: Frame<'_>) -> ExecutionResult {
        let code = substitute_placeholders(&template.transform, context);
        let depth = frame.depth;
        let mut host = ReentrantHost { engine: self, state, frame };
        match self.evaluator.evaluate(&code, context, &mut host, frame.meter) {
            Ok(result) => {
                debug!(template = %template.name, depth, "template evaluated");
                ExecutionResult::success(result, &template.output_format)
            }
            Err(error) => {
                warn!(template = %template.name, depth, error = %error, "template evaluation failed");
                ExecutionResult::error(error.to_string())
            }
        }
    }
}

/// Caller context with the function's declared input slot bound to `context.input`.
///
/// When the caller passes no `input`, the context is used as is, so callers may also supply
/// the slot under its declared name directly.
pub fn function_context(function: &FunctionDef, context: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = context.clone();
    if let Some(input) = context.get("input") {
        merged.insert(function.input.name.clone(), input.clone());
    }
    merged
}

/// Position of one evaluation in a reentrant call tree.
#[derive(Clone, Copy)]
struct Frame<'m> {
    depth: usize,
    meter: &'m StepMeter,
}

/// Lends `execute` to a running transform, one level deeper than the caller.
struct ReentrantHost<'a> {
    engine: &'a ExecutionEngine,
    state: &'a SystemState,
    frame: Frame<'a>,
}

impl HostCalls for ReentrantHost<'_> {
    fn execute(&mut self, name: &str, context: Map<String, Value>) -> std::result::Result<Value, EvalError> {
        let depth = self.frame.depth + 1;
        if depth > self.engine.max_call_depth {
            return Err(EvalError::CallDepth(self.engine.max_call_depth));
        }
        let frame = Frame {
            depth,
            meter: self.frame.meter,
        };
        let result = self
            .engine
            .execute_at_depth(self.state, name, &context, frame)
            .map_err(|error| EvalError::Runtime(error.to_string()))?;
        serde_json::to_value(result).map_err(|error| EvalError::Runtime(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use serde_json::json;

    const DOC: &str = r#"# Function: process_text
- description: "Processes input text"
- input: text: string
- output: result: string
- template: text_processor

# Template: text_processor
- input_placeholder: "{{text}}"
- transform: |
    return context.text.toUpperCase();
- output_format: string

# Template: shout
- input_placeholder: "{{word}}"
- transform: |
    return "{{word}}" + "!";
- output_format: string

# Template: chain
- input_placeholder: "{{text}}"
- transform: |
    const inner = execute('process_text', { input: context.text });
    return inner.result + ' / ' + inner.status;
- output_format: string

# Template: recurse
- input_placeholder: "{{n}}"
- transform: |
    return execute('recurse', {});
- output_format: json

# Template: fan
- input_placeholder: "{{n}}"
- transform: |
    return [1,2,3,4,5,6,7,8,9,10].map(i => execute('fan', {}).status).length;
- output_format: number

# Function: dangling
- description: "Points nowhere"
- input: text: string
- output: result: string
- template: missing_template
"#;

    fn state() -> SystemState {
        let mut state = SystemState::new();
        state.apply_parsed(parse_document(DOC), DOC);
        state
    }

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn function_maps_input_into_declared_slot() {
        let result = ExecutionEngine::default()
            .execute(&state(), "process_text", &ctx(json!({"input": "hello world"})))
            .unwrap();
        assert_eq!(result, ExecutionResult::success(json!("HELLO WORLD"), "string"));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"status": "success", "result": "HELLO WORLD", "format": "string"})
        );
    }

    #[test]
    fn declared_slot_can_be_passed_directly() {
        let result = ExecutionEngine::default()
            .execute(&state(), "process_text", &ctx(json!({"text": "abc"})))
            .unwrap();
        assert_eq!(result.value(), Some(&json!("ABC")));
    }

    #[test]
    fn template_placeholders_are_substituted() {
        let result = ExecutionEngine::default().execute(&state(), "shout", &ctx(json!({"word": "hey"}))).unwrap();
        assert_eq!(result.value(), Some(&json!("hey!")));
    }

    #[test]
    fn unknown_name_is_a_hard_failure() {
        let error = ExecutionEngine::default().execute(&state(), "nonexistent", &Map::new()).unwrap_err();
        assert!(matches!(&error, EngineError::UnknownName(name) if name == "nonexistent"));
        assert!(error.to_string().contains("nonexistent"));
    }

    #[test]
    fn missing_template_is_a_hard_failure() {
        let error = ExecutionEngine::default().execute(&state(), "dangling", &Map::new()).unwrap_err();
        assert!(error.to_string().contains("missing_template"));
    }

    #[test]
    fn evaluation_faults_become_error_results() {
        let result = ExecutionEngine::default().execute(&state(), "text_processor", &Map::new()).unwrap();
        assert!(!result.is_success());
        assert_eq!(result.format(), "error");
        let ExecutionResult::Error { error, .. } = result else {
            panic!("expected an error result");
        };
        assert!(error.contains("toUpperCase"));
    }

    #[test]
    fn reentrant_execute_returns_result_records() {
        let result = ExecutionEngine::default().execute(&state(), "chain", &ctx(json!({"text": "inner"}))).unwrap();
        assert_eq!(result.value(), Some(&json!("INNER / success")));
    }

    #[test]
    fn reentrant_recursion_is_bounded() {
        let engine = ExecutionEngine::new(Arc::new(ScriptEvaluator::default()), 3);
        let result = engine.execute(&state(), "recurse", &Map::new()).unwrap();
        // The innermost call faults; each outer level returns the record below it.
        let mut value = result.value().cloned().unwrap();
        let mut levels = 0;
        while value["status"] == json!("success") {
            value = value["result"].clone();
            levels += 1;
        }
        assert_eq!(levels, 2);
        assert_eq!(value["status"], json!("error"));
        assert!(value["error"].as_str().unwrap().contains("call depth"));
    }

    #[test]
    fn fan_out_shares_one_step_budget() {
        let engine = ExecutionEngine::new(Arc::new(ScriptEvaluator::new(1_000)), 8);
        let result = engine.execute(&state(), "fan", &Map::new()).unwrap();
        let ExecutionResult::Error { error, .. } = result else {
            panic!("fan-out should exhaust the shared budget");
        };
        assert_eq!(error, EvalError::StepBudget(1_000).to_string());
    }
}
