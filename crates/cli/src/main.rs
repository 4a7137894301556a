use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use readmes_engine::{NavigationMode, Session};
use readmes_util::config::{RuntimeConfig, parse_endpoint};
use readmes_util::path_processing::read_document_sources;
use readmes_util::state_store::JsonStateStore;
use readmes_util::text_processing::redact_sensitive;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();
    let config = load_config(&matches)?;
    let mut session = open_session(&config)?;
    run_command(&mut session, &matches).await
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let context_arg = || {
        Arg::new("context")
            .long("context")
            .action(ArgAction::Set)
            .value_name("JSON")
            .help("Context record as a JSON object")
    };

    Command::new("readmes")
        .about("Run READMEs programs: markdown documents declaring functions, templates, and warmholes")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(global_arg("state", "PATH", "Snapshot file to load and save"))
        .arg(global_arg("config", "PATH", "Runtime config file"))
        .arg(global_arg("lm-command", "CMD", "Local LM command used as the decision service"))
        .arg(global_arg("lm-endpoint", "URL", "HTTP endpoint used as the decision service"))
        .subcommand(
            Command::new("init").about("Parse documents into the program state").arg(
                Arg::new("paths")
                    .required(true)
                    .num_args(1..)
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Markdown files, or directories of them"),
            ),
        )
        .subcommand(
            Command::new("execute")
                .about("Execute a function or template")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("input").long("input").action(ArgAction::Set).help("Value bound to the function's input"))
                .arg(context_arg()),
        )
        .subcommand(
            Command::new("navigate")
                .about("Move to the next warmhole from the given one")
                .arg(Arg::new("id").required(true))
                .arg(
                    Arg::new("guided")
                        .long("guided")
                        .action(ArgAction::SetTrue)
                        .help("Let the decision service judge the transition"),
                ),
        )
        .subcommand(
            Command::new("context")
                .about("Replace the current context")
                .arg(Arg::new("json").required(true).value_name("JSON")),
        )
        .subcommand(
            Command::new("plan")
                .about("Run a natural-language intent as a plan")
                .arg(Arg::new("intent").required(true).num_args(1..).trailing_var_arg(true)),
        )
        .subcommand(
            Command::new("describe")
                .about("Show the description of a function or warmhole")
                .arg(Arg::new("word").required(true)),
        )
        .subcommand(Command::new("list").about("List functions, templates, and warmholes"))
        .subcommand(Command::new("headers").about("Show the header index"))
        .subcommand(Command::new("state").about("Print the full state snapshot"))
        .subcommand(
            Command::new("validate")
                .about("Ask the decision service to check input for a function or template")
                .arg(Arg::new("name").required(true))
                .arg(context_arg()),
        )
        .subcommand(Command::new("analyze").about("Ask the decision service to review the current state"))
}

fn global_arg(name: &'static str, value_name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .global(true)
        .action(ArgAction::Set)
        .value_name(value_name)
        .help(help)
}

/// Config file, then environment, then flags.
fn load_config(matches: &ArgMatches) -> Result<RuntimeConfig> {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = RuntimeConfig::load_with_path(config_path.as_deref()).context("failed to load runtime config")?;

    if let Some(state) = matches.get_one::<String>("state") {
        config.state_path = Some(PathBuf::from(state));
    }
    if let Some(command) = matches.get_one::<String>("lm-command") {
        config.decision.command = Some(command.clone());
    }
    if let Some(endpoint) = matches.get_one::<String>("lm-endpoint") {
        config.decision.endpoint = Some(parse_endpoint(endpoint)?);
    }
    debug!(
        command = %redact_sensitive(config.decision.command.as_deref().unwrap_or("")),
        endpoint = ?config.decision.endpoint.as_ref().map(|url| url.as_str()),
        navigation = ?config.navigation,
        "runtime config resolved"
    );
    Ok(config)
}

fn open_session(config: &RuntimeConfig) -> Result<Session> {
    let store = JsonStateStore::new(config.resolved_state_path());
    debug!(path = %store.path().display(), "using state file");
    let mut session = Session::from_config(config, Arc::new(store))?;
    session.load().context("failed to load saved state")?;
    debug!(
        decision_service = session.has_decision_service(),
        navigation = ?session.navigation_mode(),
        "session ready"
    );
    Ok(session)
}

async fn run_command(session: &mut Session, matches: &ArgMatches) -> Result<()> {
    let (command, sub) = matches.subcommand().context("expected a subcommand")?;
    match command {
        "init" => {
            let paths: Vec<PathBuf> = sub.get_many::<PathBuf>("paths").into_iter().flatten().cloned().collect();
            let document = read_document_sources(&paths)?;
            print_json(&session.init(&document)?)
        }
        "execute" => {
            let name = required(sub, "name")?;
            let mut context = parse_context(sub.get_one::<String>("context"))?;
            if let Some(input) = sub.get_one::<String>("input") {
                context.insert("input".to_string(), Value::String(input.clone()));
            }
            print_json(&session.execute(name, &context)?)
        }
        "navigate" => {
            let id = required(sub, "id")?;
            let mode = if sub.get_flag("guided") { NavigationMode::Guided } else { session.navigation_mode() };
            if mode == NavigationMode::Guided {
                require_decision_service(session, "guided navigation")?;
            }
            print_json(&session.navigate_with(id, mode).await?)
        }
        "context" => {
            let context = parse_context(sub.get_one::<String>("json"))?;
            session.set_context(context)?;
            print_json(&session.state().current_context)
        }
        "plan" => {
            let intent = sub.get_many::<String>("intent").into_iter().flatten().cloned().collect::<Vec<_>>().join(" ");
            require_decision_service(session, "plan")?;
            print_json(&session.run_plan(&intent).await?)
        }
        "describe" => {
            let word = required(sub, "word")?;
            let description = session
                .describe(word)
                .ok_or_else(|| anyhow!("no function or warmhole named '{word}'"))?;
            print_json(&description)
        }
        "list" => {
            let state = session.state();
            print_json(&json!({
                "functions": state.functions.values().map(|f| json!({"name": f.name, "description": f.description, "template": f.template})).collect::<Vec<_>>(),
                "templates": state.templates.values().map(|t| json!({"name": t.name, "outputFormat": t.output_format})).collect::<Vec<_>>(),
                "warmholes": state.warmholes.values().map(|w| json!({"name": w.name, "description": w.description, "next_warmhole": w.next_warmhole})).collect::<Vec<_>>(),
            }))
        }
        "headers" => print_json(&session.state().metadata),
        "state" => print_json(&session.state().to_snapshot()?),
        "validate" => {
            let name = required(sub, "name")?;
            let context = parse_context(sub.get_one::<String>("context"))?;
            require_decision_service(session, "validate")?;
            print_json(&session.validate_input(name, &context).await?)
        }
        "analyze" => {
            require_decision_service(session, "analyze")?;
            print_json(&session.analyze_state().await?)
        }
        other => bail!("unknown command: {other}"),
    }
}

fn require_decision_service(session: &Session, what: &str) -> Result<()> {
    if !session.has_decision_service() {
        bail!("{what} needs a decision service; pass --lm-command or --lm-endpoint, or set READMES_LM_COMMAND");
    }
    Ok(())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing required argument '{name}'"))
}

/// Parses an optional JSON object argument; absent means an empty record.
fn parse_context(raw: Option<&String>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).with_context(|| format!("invalid context JSON: {raw}"))? {
        Value::Object(map) => Ok(map),
        other => bail!("context must be a JSON object, got {other}"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommands() {
        let matches = build_cli()
            .try_get_matches_from(["readmes", "navigate", "start", "--guided", "--state", "/tmp/s.json"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("state").map(String::as_str), Some("/tmp/s.json"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "navigate");
        assert!(sub.get_flag("guided"));
    }

    #[test]
    fn plan_intent_collects_words() {
        let matches = build_cli().try_get_matches_from(["readmes", "plan", "process", "the", "text"]).unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let words: Vec<_> = sub.get_many::<String>("intent").unwrap().cloned().collect();
        assert_eq!(words, vec!["process", "the", "text"]);
    }

    #[test]
    fn context_must_be_an_object() {
        assert!(parse_context(None).unwrap().is_empty());
        assert_eq!(parse_context(Some(&r#"{"text": "hi"}"#.to_string())).unwrap()["text"], json!("hi"));
        assert!(parse_context(Some(&"[1]".to_string())).is_err());
        assert!(parse_context(Some(&"{oops".to_string())).is_err());
    }

    #[tokio::test]
    async fn commands_share_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("program.md");
        std::fs::write(
            &document,
            "# Function: shout\n- description: \"Uppercases\"\n- input: text: string\n- output: result: string\n- template: upper\n\n# Template: upper\n- input_placeholder: \"{{text}}\"\n- transform: |\n    return context.text.toUpperCase();\n- output_format: string\n",
        )
        .unwrap();
        let state = dir.path().join("state.json");
        let config = dir.path().join("missing-config.json");
        let run = |args: Vec<String>| {
            let mut argv = vec!["readmes".to_string()];
            argv.extend(args);
            argv.extend(["--state".to_string(), state.display().to_string()]);
            argv.extend(["--config".to_string(), config.display().to_string()]);
            build_cli().try_get_matches_from(argv).unwrap()
        };

        let init = run(vec!["init".into(), document.display().to_string()]);
        let mut session = open_session(&load_config(&init).unwrap()).unwrap();
        run_command(&mut session, &init).await.unwrap();
        assert!(state.exists());

        let execute = run(vec!["execute".into(), "shout".into(), "--input".into(), "hi".into()]);
        let mut session = open_session(&load_config(&execute).unwrap()).unwrap();
        assert!(session.state().functions.contains_key("shout"));
        run_command(&mut session, &execute).await.unwrap();
        assert_eq!(session.state().history.len(), 2);
    }

    #[tokio::test]
    async fn plan_without_decision_service_explains_how_to_configure_one() {
        let matches = build_cli().try_get_matches_from(["readmes", "plan", "do", "things"]).unwrap();
        let mut session = Session::in_memory();
        let error = run_command(&mut session, &matches).await.unwrap_err();
        assert!(error.to_string().contains("--lm-command"), "error: {error}");
        assert!(session.state().decisions.is_empty());
    }
}
