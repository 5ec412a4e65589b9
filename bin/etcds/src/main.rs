//! ---
//! etcds_section: "05-networking-external-interfaces"
//! etcds_subsection: "binary"
//! etcds_type: "source"
//! etcds_scope: "code"
//! etcds_description: "Operator CLI for the etcds fleet."
//! etcds_version: "v0.1.0"
//! etcds_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, Args, Command, FromArgMatches};
use etcds_common::{FleetConfig, Inventory};
use etcds_logging::{self as logging, etcds_warn, LogFormat};
use etcds_orchestrator::{Backends, Fleet};
use tracing::debug;

mod commands;

use commands::{CommandSpec, Status};

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Node inventory (defaults to ETCDS_INVENTORY or ./etcds.yml).
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    file: Option<PathBuf>,

    /// Settings file (defaults to ETCDS_CONFIG or ./etcds.toml).
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Diagnostic format on stderr.
    #[arg(long = "log-format", value_name = "FORMAT", value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,
}

fn parse_log_format(raw: &str) -> std::result::Result<LogFormat, String> {
    raw.parse()
}

fn version_line() -> String {
    format!("etcds version {}", env!("CARGO_PKG_VERSION"))
}

/// Inventory named on the command line, read before the full parse so the
/// help footer reflects `-f`.
fn inventory_flag<I, T>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let scan = GlobalArgs::augment_args(
        Command::new("etcds")
            .disable_version_flag(true)
            .disable_help_flag(true)
            .arg(Arg::new("help").short('h').long("help").action(ArgAction::SetTrue))
            .allow_external_subcommands(true)
            .ignore_errors(true),
    );
    let matches = scan.try_get_matches_from(args).ok()?;
    GlobalArgs::from_arg_matches(&matches).ok()?.file
}

fn build_cli(table: &[CommandSpec], inventory: &Path) -> Command {
    let cli = Command::new("etcds")
        .about("Provision and operate a TLS-secured etcd fleet on remote docker hosts")
        .disable_version_flag(true)
        .subcommand_help_heading("Available sub commands")
        .after_help(format!("inventory: {}", inventory.display()));
    let cli = GlobalArgs::augment_args(cli);
    table
        .iter()
        .fold(cli, |cli, spec| cli.subcommand(spec.to_command()))
}

fn run() -> Result<Status> {
    let table = commands::table();
    let inventory_hint = Inventory::resolve_path(inventory_flag(std::env::args_os()).as_deref());
    let mut cli = build_cli(&table, &inventory_hint);
    let matches = cli.clone().get_matches();
    let globals = GlobalArgs::from_arg_matches(&matches)?;

    if globals.version {
        println!("{}", version_line());
        return Ok(Status::Clean);
    }
    let Some((name, sub_matches)) = matches.subcommand() else {
        cli.print_help().context("printing help")?;
        return Ok(Status::Clean);
    };

    let loaded = FleetConfig::load_with_source(globals.config.as_deref())
        .context("failed to load settings")?;
    logging::init(globals.log_format.unwrap_or(loaded.config.logging.format));
    debug!(settings = ?loaded.source, command = name, "dispatching");

    let inventory_path = Inventory::resolve_path(globals.file.as_deref());
    let inventory = Inventory::load(&inventory_path)
        .with_context(|| format!("failed to load inventory {}", inventory_path.display()))?;
    let backends = Backends::live(&loaded.config).context("failed to prepare backends")?;
    let fleet = Fleet::new(inventory, loaded.config, backends)?;

    let spec = table
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| anyhow!("unknown command {name}"))?;
    let status = (spec.handler)(&fleet, sub_matches)?;
    if status == Status::Partial {
        etcds_warn!("{name} did not succeed on every node");
    }
    Ok(status)
}

fn main() -> Result<ExitCode> {
    Ok(match run()? {
        Status::Clean => ExitCode::SUCCESS,
        Status::Partial => ExitCode::FAILURE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli(&commands::table(), Path::new("etcds.yml")).debug_assert();
    }

    #[test]
    fn global_flags_precede_the_command() {
        let matches = build_cli(&commands::table(), Path::new("etcds.yml"))
            .try_get_matches_from(["etcds", "-f", "other.yml", "--log-format", "json", "up", "a", "b"])
            .unwrap();
        let globals = GlobalArgs::from_arg_matches(&matches).unwrap();
        assert_eq!(globals.file, Some(PathBuf::from("other.yml")));
        assert_eq!(globals.log_format, Some(LogFormat::Json));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "up");
        assert_eq!(sub.get_many::<String>("names").unwrap().count(), 2);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(build_cli(&commands::table(), Path::new("etcds.yml"))
            .try_get_matches_from(["etcds", "--log-format", "xml", "ls"])
            .is_err());
    }

    #[test]
    fn inventory_flag_is_found_ahead_of_the_full_parse() {
        assert_eq!(
            inventory_flag(["etcds", "-f", "other.yml", "-h"]),
            Some(PathBuf::from("other.yml"))
        );
        assert_eq!(
            inventory_flag(["etcds", "--file", "other.yml", "up", "a"]),
            Some(PathBuf::from("other.yml"))
        );
        assert_eq!(inventory_flag(["etcds", "ls"]), None);
    }

    #[test]
    fn help_footer_names_the_inventory() {
        let help = build_cli(&commands::table(), Path::new("other.yml"))
            .render_help()
            .to_string();
        assert!(help.contains("inventory: other.yml"));
    }
}
