//! Command execution.

use crate::config::Config;
use crate::script::{load_document, ScriptTarget};
use crate::Commands;
use colored::Colorize;
use serde_json::Value;
use statecraft_core::{
    Definition, FsmError, Machine, Phase, Recovery, Transition, TransitionHandle,
};
use std::path::Path;
use std::sync::Arc;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(cmd: Commands, config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Check { definition } => {
            let definition = compile(&definition, config)?;
            Ok(format_summary(&definition))
        }

        Commands::Inspect { definition, json } => {
            let definition = compile(&definition, config)?;
            if json {
                let table: Vec<Value> = definition
                    .transitions()
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<_, _>>()?;
                Ok(format_json(&Value::Array(table)))
            } else {
                Ok(format_transition_table(&definition))
            }
        }

        Commands::Run {
            definition,
            target,
            events,
            json,
        } => {
            let machine = build_machine(&definition, target.as_deref(), config)?;
            if json {
                let mut reports = Vec::new();
                for event in events {
                    let (name, args) = parse_event_arg(&event)?;
                    let transition = machine.send(&name, args).map_err(|e| describe_error(&e))?;
                    reports.push(handle_report(transition).await?);
                }
                return Ok(format_json(&Value::Array(reports)));
            }

            let mut output = format!(
                "{} {}\n",
                "Initial state:".bold(),
                machine.current_state().yellow()
            );

            for event in events {
                let (name, args) = parse_event_arg(&event)?;
                let transition = match machine.send(&name, args) {
                    Ok(handle) => handle.wait().await?,
                    Err(e) => return Err(format!("{}\n{}", output.trim_end(), describe_error(&e)).into()),
                };
                output.push_str(&format_transition(&transition));
            }

            output.push_str(&format!(
                "{} {}",
                "Final state:".bold(),
                machine.current_state().yellow()
            ));
            Ok(output)
        }

        // Repl is handled directly in main.rs (interactive)
        Commands::Repl { .. } => unreachable!(),
    }
}

async fn handle_report(handle: TransitionHandle) -> Result<Value, Box<dyn std::error::Error>> {
    let transition = handle.wait().await?;
    Ok(serde_json::to_value(transition.report())?)
}

/// Compiles a definition file with the configured machine options applied.
pub fn compile(path: &Path, config: &Config) -> Result<Definition, Box<dyn std::error::Error>> {
    let payload = config.machine.prepare(load_document(path)?);
    Ok(Definition::compile(payload)?)
}

/// Builds a machine from a definition file and an optional target file.
pub fn build_machine(
    definition: &Path,
    target: Option<&Path>,
    config: &Config,
) -> Result<Machine, Box<dyn std::error::Error>> {
    let definition = compile(definition, config)?;
    let target = ScriptTarget::load(target, config.target.lenient_callbacks)?;
    Ok(Machine::with_options(
        Arc::new(definition),
        Arc::new(target),
        config.machine.clone(),
    ))
}

/// Parses `name` or `name:<json>` (the JSON may be `@file.json`).
///
/// A JSON array supplies several arguments; any other value is one argument.
pub fn parse_event_arg(arg: &str) -> Result<(String, Vec<Value>), Box<dyn std::error::Error>> {
    match arg.split_once(':') {
        None => Ok((arg.to_string(), Vec::new())),
        Some((name, json)) => {
            let args = match parse_json_arg(json)? {
                Value::Array(values) => values,
                value => vec![value],
            };
            Ok((name.to_string(), args))
        }
    }
}

/// Parses a JSON argument (either inline JSON or @file.json).
pub fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

pub fn describe_error(err: &FsmError) -> String {
    format!("{} [{}]", err, err.error_code())
}

pub fn format_summary(definition: &Definition) -> String {
    let summary = definition.summary();
    let mut output = format!(
        "{} (checksum: {})\n",
        "Definition OK".green(),
        summary.checksum
    );
    output.push_str(&format!(
        "  Initial state: {}{}\n",
        summary.initial_state.yellow(),
        if summary.is_explicit { " (explicit)" } else { "" }
    ));
    output.push_str(&format!("  States:      {}\n", summary.state_names.join(", ")));
    if !summary.state_namespaces.is_empty() {
        output.push_str(&format!(
            "  Namespaces:  {}\n",
            summary.state_namespaces.join(", ")
        ));
    }
    output.push_str(&format!("  Events:      {}\n", summary.event_names.join(", ")));
    output.push_str(&format!("  Transitions: {}", summary.transition_count));
    output
}

pub fn format_transition_table(definition: &Definition) -> String {
    let mut output = String::new();
    for event in definition.events() {
        output.push_str(&format!("{}\n", event.name.cyan()));
        for id in &event.transitions {
            let rule = definition.transition(*id);
            let guard = rule
                .guard()
                .map(|g| {
                    let polarity = if g.is_inverted() { "unless" } else { "if" };
                    format!(" [{} {}]", polarity, g.source())
                })
                .unwrap_or_default();
            output.push_str(&format!(
                "  {} → {}{}\n",
                rule.from_state,
                rule.to_state.yellow(),
                guard.dimmed()
            ));
        }
    }
    output.trim_end().to_string()
}

pub fn format_transition(transition: &Transition) -> String {
    let status = if transition.is_rejected() {
        transition.status().to_string().red()
    } else if transition.is_aborted() {
        "aborted".yellow()
    } else {
        transition.status().to_string().green()
    };

    let mut output = format!(
        "{} {} → {} ({})\n",
        transition.event().cyan(),
        transition.from_state(),
        transition.to_state().yellow(),
        status
    );

    for phase in Phase::ALL {
        for (key, err) in transition.rejections(phase) {
            output.push_str(&format!("  {} {} {}: {}\n", "rejected".red(), phase, key, err));
        }
    }

    if let Some(error) = transition.error() {
        output.push_str(&format!("  {}: {}\n", "Error".red(), error));
    }

    match transition.recovery() {
        Some(Recovery::Dispatched { to_state }) => {
            output.push_str(&format!("  recovered into {}\n", to_state.yellow()));
        }
        Some(Recovery::Unhandled { reason }) => {
            output.push_str(&format!("  {}: {}\n", "unhandled".red(), reason));
        }
        None => {}
    }

    output
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::{Builder, NamedTempFile};

    const DEFINITION: &str = r#"
states:
  initialState: idle
  knownStates: [idle, running, done, failed]
events:
  start:
    transition: { idle: running }
  finish:
    transitions:
      - { from: running, to: done, if: ready }
  error:
    transition: { $all: failed }
"#;

    fn definition_file() -> NamedTempFile {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{}", DEFINITION).unwrap();
        file
    }

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_parse_event_arg() {
        assert_eq!(parse_event_arg("go").unwrap(), ("go".to_string(), vec![]));
        assert_eq!(
            parse_event_arg(r#"pay:{"amount":5}"#).unwrap(),
            ("pay".to_string(), vec![json!({ "amount": 5 })])
        );
        assert_eq!(
            parse_event_arg("pay:[1,2]").unwrap().1,
            vec![json!(1), json!(2)]
        );
        assert!(parse_event_arg("pay:{bad").is_err());
    }

    #[test]
    fn test_parse_json_arg_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"amount": 10}}"#).unwrap();
        let arg = format!("@{}", file.path().display());
        assert_eq!(parse_json_arg(&arg).unwrap(), json!({ "amount": 10 }));
    }

    #[tokio::test]
    async fn test_check_command() {
        plain();
        let file = definition_file();
        let output = execute(
            Commands::Check {
                definition: file.path().to_path_buf(),
            },
            &Config::default(),
        )
        .await
        .unwrap();

        assert!(output.contains("Definition OK"));
        assert!(output.contains("idle, running, done, failed"));
        assert!(output.contains("Transitions: 6"));
    }

    #[tokio::test]
    async fn test_check_reports_compile_errors() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{ "events": {{}} }}"#).unwrap();

        let err = execute(
            Commands::Check {
                definition: file.path().to_path_buf(),
            },
            &Config::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no events specified"));
    }

    #[tokio::test]
    async fn test_inspect_json() {
        let file = definition_file();
        let output = execute(
            Commands::Inspect {
                definition: file.path().to_path_buf(),
                json: true,
            },
            &Config::default(),
        )
        .await
        .unwrap();

        let table: Value = serde_json::from_str(&output).unwrap();
        let rows = table.as_array().unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[1]["guard"], "if ready");
    }

    #[tokio::test]
    async fn test_run_command() {
        plain();
        let file = definition_file();
        let mut target = Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(target, "properties:\n  ready: true\n").unwrap();

        let output = execute(
            Commands::Run {
                definition: file.path().to_path_buf(),
                target: Some(target.path().to_path_buf()),
                events: vec!["start".into(), "finish".into()],
                json: false,
            },
            &Config::default(),
        )
        .await
        .unwrap();

        assert!(output.contains("start idle → running (resolved)"));
        assert!(output.ends_with("Final state: done"));
    }

    #[tokio::test]
    async fn test_run_stops_on_resolution_error() {
        let file = definition_file();
        let err = execute(
            Commands::Run {
                definition: file.path().to_path_buf(),
                target: None,
                events: vec!["finish".into()],
                json: false,
            },
            &Config::default(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("NO_TRANSITION"));
    }

    #[tokio::test]
    async fn test_run_json_reports() {
        let file = definition_file();
        let output = execute(
            Commands::Run {
                definition: file.path().to_path_buf(),
                target: None,
                events: vec![r#"start:{"by":"ops"}"#.into()],
                json: true,
            },
            &Config::default(),
        )
        .await
        .unwrap();

        let reports: Value = serde_json::from_str(&output).unwrap();
        let report = &reports.as_array().unwrap()[0];
        assert_eq!(report["event"], "start");
        assert_eq!(report["from"], "idle");
        assert_eq!(report["to"], "running");
        assert_eq!(report["status"], "resolved");
        assert_eq!(report["args"], json!([{ "by": "ops" }]));
        assert_eq!(report["aborted"], false);
    }

    #[test]
    fn test_missing_definition_file() {
        let result = compile(&PathBuf::from("/nonexistent/machine.json"), &Config::default());
        assert!(result.is_err());
    }
}
