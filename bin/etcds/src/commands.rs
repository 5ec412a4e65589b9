//! ---
//! etcds_section: "05-networking-external-interfaces"
//! etcds_subsection: "binary"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Operator CLI for the etcds fleet."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use etcds_orchestrator::{
    CommandOutput, FanOutEntry, FanOutOutcome, Fleet, NodeOutcome, Transition,
};
use etcds_security::InitOutcome;

/// Whether every node a command touched ended up fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Clean,
    Partial,
}

impl Status {
    fn from_failures(any_failed: bool) -> Self {
        if any_failed {
            Status::Partial
        } else {
            Status::Clean
        }
    }
}

pub type Handler = fn(&Fleet, &ArgMatches) -> Result<Status>;

/// Positional arguments a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    None,
    Names,
    Ps,
    Ctl,
    Key,
}

/// One row of the command table.
pub struct CommandSpec {
    pub name: &'static str,
    pub args: ArgShape,
    pub about: &'static str,
    pub handler: Handler,
}

impl CommandSpec {
    pub fn to_command(&self) -> Command {
        let command = Command::new(self.name).about(self.about);
        match self.args {
            ArgShape::None => command,
            ArgShape::Names => command.arg(
                Arg::new("names")
                    .value_name("NAME")
                    .num_args(0..)
                    .help("Inventory node names"),
            ),
            ArgShape::Ps => command.arg(
                Arg::new("all")
                    .short('a')
                    .long("all")
                    .action(ArgAction::SetTrue)
                    .help("Include stopped containers"),
            ),
            ArgShape::Ctl => command
                .arg(
                    Arg::new("name")
                        .value_name("NAME")
                        .required(true)
                        .help("Node whose endpoint receives the command"),
                )
                .arg(
                    Arg::new("args")
                        .value_name("COMMANDS")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("Arguments forwarded to etcdctl"),
                ),
            ArgShape::Key => command.arg(
                Arg::new("key")
                    .value_name("NODE:PATH")
                    .required(true)
                    .help("Node-qualified key, e.g. a:/v2/keys/foo"),
            ),
        }
    }
}

/// Every subcommand, in help order.
pub fn table() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "ls",
            args: ArgShape::None,
            about: "list up nodes",
            handler: ls,
        },
        CommandSpec {
            name: "init",
            args: ArgShape::None,
            about: "prepare ca files for all nodes",
            handler: init,
        },
        CommandSpec {
            name: "install",
            args: ArgShape::Names,
            about: "install ca files to the host",
            handler: install,
        },
        CommandSpec {
            name: "ps",
            args: ArgShape::Ps,
            about: "list up etcd containers",
            handler: ps,
        },
        CommandSpec {
            name: "stop",
            args: ArgShape::Names,
            about: "stop nodes",
            handler: stop,
        },
        CommandSpec {
            name: "rm",
            args: ArgShape::Names,
            about: "remove stopped nodes",
            handler: rm,
        },
        CommandSpec {
            name: "up",
            args: ArgShape::Names,
            about: "prepare and activate etcd",
            handler: up,
        },
        CommandSpec {
            name: "health",
            args: ArgShape::None,
            about: "show cluster health for all nodes",
            handler: health,
        },
        CommandSpec {
            name: "member",
            args: ArgShape::None,
            about: "show member list for all nodes",
            handler: member,
        },
        CommandSpec {
            name: "ctl",
            args: ArgShape::Ctl,
            about: "pass commands to etcdctl",
            handler: ctl,
        },
        CommandSpec {
            name: "get",
            args: ArgShape::Key,
            about: "read a value from a node",
            handler: get,
        },
    ]
}

fn names(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("names")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

/// Names for commands that never default to the whole fleet.
fn required_names(matches: &ArgMatches, command: &str) -> Option<Vec<String>> {
    let names = names(matches);
    if names.is_empty() {
        eprintln!("no nodes named; {command} did nothing");
        return None;
    }
    Some(names)
}

fn print_failures<T>(outcomes: &[NodeOutcome<T>], operation: &str) -> Status {
    for outcome in outcomes {
        if let Err(err) = &outcome.result {
            eprintln!("{operation} failed at {}: {err}", outcome.node);
        }
    }
    Status::from_failures(outcomes.iter().any(NodeOutcome::is_failure))
}

fn ls(fleet: &Fleet, _: &ArgMatches) -> Result<Status> {
    let statuses = fleet.ls();
    for status in &statuses {
        println!("{status}");
    }
    Ok(Status::from_failures(
        statuses.iter().any(|status| status.state.is_err()),
    ))
}

fn init(fleet: &Fleet, _: &ArgMatches) -> Result<Status> {
    let report = fleet.init().context("fleet initialisation failed")?;
    let root = match report.provision.root {
        InitOutcome::Created => "created",
        InitOutcome::Reused => "reused",
    };
    println!("ca root {root} in {}", fleet.config().certs_dir.display());
    for subject in &report.provision.subjects {
        println!("certificate exported for {subject}");
    }
    println!("discovery: {}", report.token);
    Ok(Status::Clean)
}

fn install(fleet: &Fleet, matches: &ArgMatches) -> Result<Status> {
    let outcomes = fleet.install(&names(matches))?;
    for outcome in &outcomes {
        if let Ok(paths) = &outcome.result {
            println!("{}: installed {}", outcome.node, paths.join(", "));
        }
    }
    Ok(print_failures(&outcomes, "install"))
}

fn ps(fleet: &Fleet, matches: &ArgMatches) -> Result<Status> {
    let outcomes = fleet.ps(matches.get_flag("all"));
    for outcome in &outcomes {
        if let Ok(listing) = &outcome.result {
            println!("Node {}:", outcome.node);
            println!("{listing}");
        }
    }
    Ok(print_failures(&outcomes, "ps"))
}

fn print_transitions(outcomes: &[NodeOutcome<Transition>], verb: &str) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(Transition::Applied { .. }) => println!("etcd is {verb} at {}", outcome.node),
            Ok(Transition::Skipped(warning)) => eprintln!("{warning}"),
            Err(_) => {}
        }
    }
}

fn stop(fleet: &Fleet, matches: &ArgMatches) -> Result<Status> {
    let outcomes = fleet.stop(&names(matches))?;
    print_transitions(&outcomes, "stopped");
    Ok(print_failures(&outcomes, "stop"))
}

fn rm(fleet: &Fleet, matches: &ArgMatches) -> Result<Status> {
    let Some(names) = required_names(matches, "rm") else {
        return Ok(Status::Clean);
    };
    let outcomes = fleet.rm(&names)?;
    print_transitions(&outcomes, "removed");
    Ok(print_failures(&outcomes, "rm"))
}

fn up(fleet: &Fleet, matches: &ArgMatches) -> Result<Status> {
    let Some(names) = required_names(matches, "up") else {
        return Ok(Status::Clean);
    };
    let outcomes = fleet.up(&names)?;
    for outcome in &outcomes {
        if let Ok(report) = &outcome.result {
            println!("etcd is started at {} ({})", outcome.node, report.container_id);
        }
    }
    Ok(print_failures(&outcomes, "up"))
}

fn write_output(output: &CommandOutput) -> Result<()> {
    io::stdout()
        .write_all(output.stdout.as_bytes())
        .context("writing command output")?;
    io::stderr()
        .write_all(output.stderr.as_bytes())
        .context("writing command diagnostics")?;
    Ok(())
}

fn print_fan_out(entries: &[FanOutEntry<CommandOutput>]) -> Result<Status> {
    let mut failed = false;
    for entry in entries {
        match &entry.outcome {
            FanOutOutcome::Completed(output) => {
                println!("{}:", entry.node);
                write_output(output)?;
                failed |= !output.success();
            }
            FanOutOutcome::NotRunning(state) => println!("{}: not running ({state})", entry.node),
            FanOutOutcome::Unreachable(err) => {
                eprintln!("{}: unreachable: {err}", entry.node);
                failed = true;
            }
            FanOutOutcome::Failed(err) => {
                eprintln!("{}: {err}", entry.node);
                failed = true;
            }
        }
    }
    Ok(Status::from_failures(failed))
}

fn health(fleet: &Fleet, _: &ArgMatches) -> Result<Status> {
    print_fan_out(&fleet.health())
}

fn member(fleet: &Fleet, _: &ArgMatches) -> Result<Status> {
    print_fan_out(&fleet.member())
}

fn ctl(fleet: &Fleet, matches: &ArgMatches) -> Result<Status> {
    let name = matches
        .get_one::<String>("name")
        .context("missing node name")?;
    let args: Vec<String> = matches
        .get_many::<String>("args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let output = fleet.ctl(name, &args)?;
    write_output(&output)?;
    Ok(Status::from_failures(!output.success()))
}

fn get(fleet: &Fleet, matches: &ArgMatches) -> Result<Status> {
    let key = matches
        .get_one::<String>("key")
        .context("missing NODE:PATH key")?;
    let body = fleet.get(key).with_context(|| format!("reading {key}"))?;
    println!("{body}");
    Ok(Status::Clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn command_names_are_unique() {
        let table = table();
        let unique: HashSet<_> = table.iter().map(|spec| spec.name).collect();
        assert_eq!(unique.len(), table.len());
        assert_eq!(table.len(), 11);
    }

    #[test]
    fn ctl_forwards_hyphenated_arguments() {
        let table = table();
        let spec = table.iter().find(|spec| spec.name == "ctl").unwrap();
        let matches = spec
            .to_command()
            .try_get_matches_from(["ctl", "a", "ls", "--recursive", "/"])
            .unwrap();
        let args: Vec<&String> = matches.get_many::<String>("args").unwrap().collect();
        assert_eq!(args, ["ls", "--recursive", "/"]);
    }

    #[test]
    fn name_lists_may_be_empty() {
        let table = table();
        let spec = table.iter().find(|spec| spec.name == "stop").unwrap();
        let matches = spec.to_command().try_get_matches_from(["stop"]).unwrap();
        assert!(names(&matches).is_empty());
    }

    #[test]
    fn up_and_rm_need_explicit_names() {
        let table = table();
        for name in ["up", "rm"] {
            let spec = table.iter().find(|spec| spec.name == name).unwrap();
            let empty = spec.to_command().try_get_matches_from([name]).unwrap();
            assert_eq!(required_names(&empty, name), None);
            let named = spec.to_command().try_get_matches_from([name, "a"]).unwrap();
            assert_eq!(required_names(&named, name), Some(vec!["a".to_owned()]));
        }
    }
}
