//! Sandboxed evaluation of template transform bodies.
//!
//! Transform bodies are untrusted document content. They run in a restricted
//! interpreter that has no file, network, process, clock, or environment access. The
//! only outbound capability is [`HostCalls::execute`], which the execution engine
//! implements with its own call-depth bound. A [`StepMeter`] caps the work of one top-level
//! evaluation together with every reentrant call it makes, so a body that loops or fans
//! out forever faults instead of hanging the session. Copies of large values are charged
//! by size, and strings and arrays have hard length limits.
//!
//! The language is a small expression/statement subset in the style of JavaScript:
//! `let`/`const`, assignment, `if`/`else`, `for (const x of xs)`, `return`, arrow
//! functions for `map`/`filter`-style callbacks, and a fixed set of globals (`JSON`,
//! `Math`, `Object`, `Array.isArray`, `String`, `Number`, `Boolean`, `parseInt`,
//! `parseFloat`, `execute`).

mod ast;
mod builtins;
mod interpreter;
mod lexer;
mod parser;
mod value;

use std::cell::Cell;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use interpreter::Interpreter;

/// Default number of evaluation steps one transform body may take.
pub const DEFAULT_MAX_STEPS: u64 = 100_000;

/// Fault raised while parsing or running a transform body.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("{0} is not defined")]
    Reference(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("{0}")]
    Runtime(String),
    #[error("evaluation exceeded the step budget of {0}")]
    StepBudget(u64),
    #[error("reentrant execute exceeded the call depth limit of {0}")]
    CallDepth(usize),
}

/// Capabilities the host lends to an evaluation.
pub trait HostCalls {
    /// Runs another function or template by name and returns its result record.
    fn execute(&mut self, name: &str, context: Map<String, Value>) -> Result<Value, EvalError>;
}

/// Host that lends nothing; `execute` always faults.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHost;

impl HostCalls for NoHost {
    fn execute(&mut self, name: &str, _context: Map<String, Value>) -> Result<Value, EvalError> {
        Err(EvalError::Runtime(format!("execute('{name}') is not available in this evaluation")))
    }
}

/// Step allowance shared by one top-level evaluation and every reentrant call it makes.
#[derive(Debug)]
pub struct StepMeter {
    used: Cell<u64>,
    limit: u64,
}

impl StepMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            used: Cell::new(0),
            limit,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.get()
    }

    /// Spends `steps`; faults once the total passes the limit.
    pub fn charge(&self, steps: u64) -> Result<(), EvalError> {
        let used = self.used.get().saturating_add(steps);
        self.used.set(used);
        if used > self.limit {
            return Err(EvalError::StepBudget(self.limit));
        }
        Ok(())
    }

    pub fn is_exhausted(&self) -> bool {
        self.used.get() > self.limit
    }
}

/// Pluggable evaluator for substituted transform bodies.
pub trait Evaluator: Send + Sync {
    /// Steps a top-level evaluation may spend, reentrant calls included.
    fn step_limit(&self) -> u64;

    /// Evaluates `code` with `context` bound as the only input, charging `meter` for the work.
    fn evaluate(&self, code: &str, context: &Map<String, Value>, host: &mut dyn HostCalls, meter: &StepMeter) -> Result<Value, EvalError>;

    /// Evaluates `code` against a fresh meter holding the full step limit.
    fn evaluate_fresh(&self, code: &str, context: &Map<String, Value>, host: &mut dyn HostCalls) -> Result<Value, EvalError> {
        self.evaluate(code, context, host, &StepMeter::new(self.step_limit()))
    }
}

/// The shipped [`Evaluator`]: a restricted tree-walking interpreter.
#[derive(Debug, Clone, Copy)]
pub struct ScriptEvaluator {
    max_steps: u64,
}

impl Default for ScriptEvaluator {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl ScriptEvaluator {
    pub fn new(max_steps: u64) -> Self {
        Self { max_steps }
    }
}

impl Evaluator for ScriptEvaluator {
    fn step_limit(&self) -> u64 {
        self.max_steps
    }

    fn evaluate(&self, code: &str, context: &Map<String, Value>, host: &mut dyn HostCalls, meter: &StepMeter) -> Result<Value, EvalError> {
        let program = parser::parse_program(code)?;
        let mut interpreter = Interpreter::new(context, host, meter)?;
        let result = interpreter.run(&program);
        debug!(
            steps = interpreter.steps_taken(),
            total_steps = meter.used(),
            ok = result.is_ok(),
            "transform evaluated"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_with(code: &str, context: Value) -> Result<Value, EvalError> {
        let context = context.as_object().cloned().unwrap_or_default();
        ScriptEvaluator::default().evaluate_fresh(code, &context, &mut NoHost)
    }

    fn eval(code: &str) -> Value {
        eval_with(code, json!({})).unwrap()
    }

    #[test]
    fn uppercases_context_text() {
        let result = eval_with("return context.text.toUpperCase();", json!({"text": "hello world"})).unwrap();
        assert_eq!(result, json!("HELLO WORLD"));
    }

    #[test]
    fn top_level_context_keys_are_readable_aliases() {
        let result = eval_with("return `${greeting}, ${name}!`", json!({"greeting": "Hi", "name": "Ada"})).unwrap();
        assert_eq!(result, json!("Hi, Ada!"));
    }

    #[test]
    fn completion_value_without_return() {
        assert_eq!(eval("const a = 2; a * 21"), json!(42));
        assert_eq!(eval("let x = 1"), Value::Null);
    }

    #[test]
    fn control_flow_and_locals() {
        let code = r#"
            let total = 0;
            const words = [];
            for (const word of "a bb ccc".split(" ")) {
                total += word.length;
                words.push(word.toUpperCase());
            }
            if (total > 5) {
                return { total, words: words.join("-") };
            } else {
                return null;
            }
        "#;
        assert_eq!(eval(code), json!({"total": 6, "words": "A-BB-CCC"}));
    }

    #[test]
    fn arrow_callbacks() {
        assert_eq!(eval("[1, 2, 3, 4].filter(n => n % 2 === 0).map(n => n * 10)"), json!([20, 40]));
        assert_eq!(eval("[1, 2, 3].reduce((acc, n) => acc + n, 0)"), json!(6));
        assert_eq!(eval("const k = 3; [1, 2].map(n => n + k)"), json!([4, 5]));
    }

    #[test]
    fn operators_follow_script_semantics() {
        assert_eq!(eval("'1' + 2"), json!("12"));
        assert_eq!(eval("'3' * '4'"), json!(12));
        assert_eq!(eval("null ?? 'fallback'"), json!("fallback"));
        assert_eq!(eval("0 || 'x'"), json!("x"));
        assert_eq!(eval("0 ?? 'x'"), json!(0));
        assert_eq!(eval("1 === 1.0 && '1' == 1 && '1' !== 1"), json!(true));
        assert_eq!(eval("typeof missing"), json!("undefined"));
        assert_eq!(eval("3 > 2 ? 'yes' : 'no'"), json!("yes"));
    }

    #[test]
    fn context_can_be_modified_through_context_binding() {
        let result = eval_with("context.count = context.count + 1; return context", json!({"count": 1})).unwrap();
        assert_eq!(result, json!({"count": 2}));
    }

    #[test]
    fn aliases_are_read_only() {
        let error = eval_with("count = 2", json!({"count": 1})).unwrap_err();
        assert!(error.to_string().contains("read-only"));
    }

    #[test]
    fn const_cannot_be_reassigned() {
        let error = eval_with("const a = 1; a = 2", json!({})).unwrap_err();
        assert!(matches!(error, EvalError::Type(_)));
    }

    #[test]
    fn reading_property_of_undefined_is_a_type_error() {
        let error = eval_with("return context.text.toUpperCase();", json!({})).unwrap_err();
        assert_eq!(error, EvalError::Type("cannot read properties of undefined (reading 'toUpperCase')".into()));
        assert_eq!(eval("const o = {}; o?.a?.b"), Value::Null);
    }

    #[test]
    fn unknown_names_are_reference_errors() {
        let error = eval_with("return process.env", json!({})).unwrap_err();
        assert_eq!(error, EvalError::Reference("process".into()));
        assert_eq!(error.to_string(), "process is not defined");
    }

    #[test]
    fn step_budget_stops_runaway_loops() {
        let code = "let s = 0; for (const a of [1,2,3,4,5,6,7,8,9,10]) { for (const b of [1,2,3,4,5,6,7,8,9,10]) { s += a * b } } s";
        let evaluator = ScriptEvaluator::new(200);
        let error = evaluator.evaluate_fresh(code, &Map::new(), &mut NoHost).unwrap_err();
        assert_eq!(error, EvalError::StepBudget(200));
        assert_eq!(ScriptEvaluator::default().evaluate_fresh(code, &Map::new(), &mut NoHost).unwrap(), json!(3025));
    }

    #[test]
    fn array_doubling_spends_the_budget() {
        let code = "let a = [0]; for (const i of '012345678901234567890123') { a = a.concat(a) } a.length";
        let error = ScriptEvaluator::new(500).evaluate_fresh(code, &Map::new(), &mut NoHost).unwrap_err();
        assert_eq!(error, EvalError::StepBudget(500));

        let error = ScriptEvaluator::new(u64::MAX).evaluate_fresh(code, &Map::new(), &mut NoHost).unwrap_err();
        assert!(matches!(error, EvalError::Runtime(message) if message.contains("element limit")));
    }

    #[test]
    fn meter_is_shared_between_evaluations() {
        let code = "let s = 0; for (const a of [1,2,3,4,5,6,7,8,9,10]) { s += a } s";
        let evaluator = ScriptEvaluator::default();
        let measure = StepMeter::new(u64::MAX);
        evaluator.evaluate(code, &Map::new(), &mut NoHost, &measure).unwrap();
        let single_run = measure.used();

        let meter = StepMeter::new(single_run * 3 / 2);
        assert_eq!(evaluator.evaluate(code, &Map::new(), &mut NoHost, &meter).unwrap(), json!(55));
        let error = evaluator.evaluate(code, &Map::new(), &mut NoHost, &meter).unwrap_err();
        assert_eq!(error, EvalError::StepBudget(single_run * 3 / 2));
        assert!(meter.is_exhausted());
    }

    #[test]
    fn string_growth_is_bounded() {
        let code = "let s = 'xxxxxxxxxxxxxxxx'; for (const i of '0123456789012345678901234567890') { s = s + s } s.length";
        let error = eval_with(code, json!({})).unwrap_err();
        assert!(matches!(error, EvalError::Runtime(message) if message.contains("exceeds")));
    }

    #[test]
    fn json_and_math_globals() {
        assert_eq!(eval("JSON.stringify({a: [1, 'b']})"), json!(r#"{"a":[1,"b"]}"#));
        assert_eq!(eval("JSON.parse('{\"n\": 2}').n + 1"), json!(3));
        assert_eq!(eval("Math.max(1, Math.floor(4.7), Math.abs(-2))"), json!(4));
        assert_eq!(eval("Object.keys({b: 1, a: 2})"), json!(["b", "a"]));
        assert_eq!(eval("Array.isArray([1]) && !Array.isArray('x')"), json!(true));
    }

    #[test]
    fn execute_without_host_faults() {
        let error = eval_with("execute('other', {})", json!({})).unwrap_err();
        assert!(error.to_string().contains("other"));
    }

    struct EchoHost {
        calls: Vec<String>,
    }

    impl HostCalls for EchoHost {
        fn execute(&mut self, name: &str, context: Map<String, Value>) -> Result<Value, EvalError> {
            self.calls.push(name.to_string());
            Ok(json!({"status": "success", "result": context.get("text").cloned().unwrap_or(Value::Null), "format": "string"}))
        }
    }

    #[test]
    fn execute_calls_through_host() {
        let mut host = EchoHost { calls: Vec::new() };
        let result = ScriptEvaluator::default()
            .evaluate_fresh("return execute('echo', { text: 'hi' }).result + '!'", &Map::new(), &mut host)
            .unwrap();
        assert_eq!(result, json!("hi!"));
        assert_eq!(host.calls, vec!["echo".to_string()]);
    }

    #[test]
    fn syntax_errors_report_line() {
        let error = eval_with("const a = 1;\nreturn a +;", json!({})).unwrap_err();
        assert!(matches!(error, EvalError::Syntax { line: 2, .. }));
    }
}
