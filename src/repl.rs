//! Interactive REPL.

use crate::commands::{compile, describe_error, format_json, format_transition, parse_json_arg};
use crate::config::Config;
use crate::script::ScriptTarget;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use serde_json::Value;
use statecraft_core::Machine;
use std::path::Path;
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  send <event> [args_json]      Send an event and wait for the transition
  state                         Show the current state
  in <state_or_prefix>          Check whether the machine is in a state
  can <state>                   Check whether a state can be entered now
  events                        List events available from the current state
  accessors                     Show isIn* accessors and their values

  set <property> <json>         Set a target property
  props                         List target properties

  quit, exit                    Exit the REPL
"#;

struct Session {
    machine: Machine,
    target: Arc<ScriptTarget>,
}

pub async fn run(
    definition: &Path,
    target: Option<&Path>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let compiled = compile(definition, config)?;
    let target = Arc::new(ScriptTarget::load(target, config.target.lenient_callbacks)?);
    let machine = Machine::with_options(
        Arc::new(compiled),
        target.clone(),
        config.machine.clone(),
    );
    let session = Session { machine, target };

    println!("{}", "statecraft REPL".bold().cyan());
    println!(
        "Loaded {} (checksum: {}, state: {})",
        definition.display(),
        session.machine.definition().checksum(),
        session.machine.current_state().yellow()
    );

    // Create readline editor
    let rl_config = rustyline::Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    let history_path = config.repl.history_path();
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!(
            "{} ",
            format!("{}>", session.machine.current_state()).cyan()
        );
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&session, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    println!("{}", "Bye.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    session: &Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];
    let machine = &session.machine;

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "send" | "s" => {
            if args.is_empty() {
                return Ok(Some("Usage: send <event> [args_json]".to_string()));
            }
            let event_args = if args.len() > 1 {
                match parse_json_arg(&args[1..].join(" "))? {
                    Value::Array(values) => values,
                    value => vec![value],
                }
            } else {
                Vec::new()
            };

            let handle = match machine.send(args[0], event_args) {
                Ok(handle) => handle,
                Err(e) => return Ok(Some(format!("{}: {}", "Error".red(), describe_error(&e)))),
            };
            let transition = handle.wait().await?;
            Ok(Some(format_transition(&transition).trim_end().to_string()))
        }

        "state" => Ok(Some(machine.current_state().yellow().to_string())),

        "in" => {
            if args.is_empty() {
                return Ok(Some("Usage: in <state_or_prefix>".to_string()));
            }
            Ok(Some(format_bool(machine.in_state(args[0]))))
        }

        "can" => {
            if args.is_empty() {
                return Ok(Some("Usage: can <state>".to_string()));
            }
            Ok(Some(format_bool(machine.can_enter_state(args[0])?)))
        }

        "events" => {
            let events = machine.definition().events_from(&machine.current_state());
            if events.is_empty() {
                return Ok(Some("No events available".yellow().to_string()));
            }
            Ok(Some(
                events
                    .iter()
                    .map(|e| format!("  {}", e.cyan()))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }

        "accessors" => Ok(Some(
            machine
                .state_accessors()
                .into_iter()
                .map(|(name, value)| format!("  {} = {}", name, format_bool(value)))
                .collect::<Vec<_>>()
                .join("\n"),
        )),

        "set" => {
            if args.len() < 2 {
                return Ok(Some("Usage: set <property> <json>".to_string()));
            }
            let value = parse_json_arg(&args[1..].join(" "))?;
            let rendered = format_json(&value);
            session.target.set_property(args[0], value);
            Ok(Some(format!("{} {} = {}", "Set".green(), args[0].cyan(), rendered)))
        }

        "props" => {
            let names = session.target.property_names();
            if names.is_empty() {
                return Ok(Some("No properties".yellow().to_string()));
            }
            Ok(Some(names.join(", ")))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

fn format_bool(value: bool) -> String {
    if value {
        "true".green().to_string()
    } else {
        "false".red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::TargetFile;
    use serde_json::json;
    use statecraft_core::{Definition, MachineOptions};

    fn session() -> Session {
        colored::control::set_override(false);
        let definition = Definition::from_json(&json!({
            "states": { "initialState": "idle" },
            "events": {
                "load": { "transitions": [
                    { "from": "idle", "to": "loading.full", "if": "online" },
                    { "idle": "loading.partial" }
                ] },
                "reset": { "transition": { "$all": "idle" } }
            }
        }))
        .unwrap();
        let target = Arc::new(ScriptTarget::new(TargetFile::default(), true));
        let machine = Machine::with_options(
            Arc::new(definition),
            target.clone(),
            MachineOptions::default(),
        );
        Session { machine, target }
    }

    async fn exec(session: &Session, line: &str) -> String {
        execute_repl_command(session, line).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_send_and_query() {
        let session = session();

        // "online" is undefined until it is set.
        let out = exec(&session, "send load").await;
        assert!(out.contains("UNDEFINED_GUARD"));

        exec(&session, "set online false").await;
        let out = exec(&session, "send load").await;
        assert!(out.contains("load idle → loading.partial (resolved)"));

        assert_eq!(exec(&session, "in loading").await, "true");
        assert_eq!(exec(&session, "state").await, "loading.partial");
        assert_eq!(exec(&session, "can idle").await, "true");
        assert_eq!(exec(&session, "events").await, "  reset");
        assert!(exec(&session, "accessors").await.contains("isInLoadingPartial = true"));
    }

    #[tokio::test]
    async fn test_exit_and_unknown() {
        let session = session();
        assert!(execute_repl_command(&session, "quit").await.unwrap().is_none());
        assert!(exec(&session, "bogus").await.contains("Unknown command"));
        assert_eq!(exec(&session, "props").await, "No properties");
    }
}
