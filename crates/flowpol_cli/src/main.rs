use std::{error::Error, path::PathBuf};

use clap::{Parser, Subcommand};
use log::info;

use flowpol_compile::{compile, DeviceCapability, RuleTable};
use flowpol_core::prelude::*;
use flowpol_io::prelude::*;
use flowpol_policy::{leaf, parallel_all, Policy};
use flowpol_store::{CoordinatorConfig, LoggingTransport, SwapMode, UpdateCoordinator};

/// Compile forwarding policies into flow tables.
#[derive(Debug, Parser)]
#[clap(name = "fpc", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
    /// Table size of the target device
    #[clap(long = "max-rules", global = true)]
    max_rules: Option<usize>,
    /// Number of priority levels of the target device
    #[clap(long = "levels", global = true)]
    levels: Option<u32>,
    /// Install the compiled table through a logging transport
    #[clap(long = "apply", global = true)]
    apply: bool,
    /// Use make-before-break instead of an atomic table swap when applying
    #[clap(long = "mbb", global = true)]
    make_before_break: bool,
    /// Coordinator settings (TOML)
    #[clap(long = "config", global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Forward packets for each destination address to one port
    Forward {
        #[clap(long = "port", short = 'p', default_value_t = 1)]
        port: PortId,
        #[clap(required = true)]
        dstips: Vec<String>,
    },
    /// Rewrite the destination MAC, then forward
    Rewrite {
        #[clap(long = "port", short = 'p', default_value_t = 1)]
        port: PortId,
        mac: String,
        #[clap(required = true)]
        dstips: Vec<String>,
    },
    /// Compile a policy expression read from a file
    Compile {
        policy: PathBuf,
        /// Device capability file
        #[clap(long = "caps")]
        caps: Option<PathBuf>,
    },
}

/// One match-and-forward leaf per address, folded with `parallel`.
fn forward_policy(dstips: &[String], port: PortId) -> Result<Policy, Box<dyn Error>> {
    let leaves = dstips
        .iter()
        .map(|ip| -> Result<Policy, Box<dyn Error>> {
            Ok(leaf(Predicate::matches("dstip", ip)?, [Action::Forward(port)])?)
        })
        .collect::<Result<Vec<_>, Box<dyn Error>>>()?;
    Ok(parallel_all(leaves)?)
}

/// Like [forward_policy], rewriting the destination MAC first.
fn rewrite_policy(dstips: &[String], mac: &str, port: PortId) -> Result<Policy, Box<dyn Error>> {
    let rewrite = Action::modify(Field::DstMac, Value::parse(Field::DstMac, mac)?)?;
    let leaves = dstips
        .iter()
        .map(|ip| -> Result<Policy, Box<dyn Error>> {
            Ok(leaf(
                Predicate::matches("dstip", ip)?,
                [rewrite, Action::Forward(port)],
            )?)
        })
        .collect::<Result<Vec<_>, Box<dyn Error>>>()?;
    Ok(parallel_all(leaves)?)
}

/// The policy, the device name and its capability.
fn prepare(cli: &Cli) -> Result<(Policy, String, DeviceCapability), Box<dyn Error>> {
    let mut device = "s1".to_string();
    let mut caps = DeviceCapability::default();
    let policy = match &cli.command {
        Command::Forward { port, dstips } => forward_policy(dstips, *port)?,
        Command::Rewrite { port, mac, dstips } => rewrite_policy(dstips, mac, *port)?,
        Command::Compile {
            policy,
            caps: caps_file,
        } => {
            if let Some(path) = caps_file {
                (device, caps) = DefaultCapLoader.load(&read_file(path)?)?;
            }
            DefaultPolicyLoader.load(&read_file(policy)?)?
        }
    };
    if let Some(max_rules) = cli.max_rules {
        caps = caps.with_max_rules(max_rules);
    }
    if let Some(levels) = cli.levels {
        caps = caps.with_priority_levels(levels);
    }
    Ok((policy, device, caps))
}

fn deploy(
    cli: &Cli,
    policy: &Policy,
    device: &str,
    caps: DeviceCapability,
) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::default(),
    };
    let mode = if cli.make_before_break {
        SwapMode::MakeBeforeBreak
    } else {
        SwapMode::Atomic
    };
    let report = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let coordinator = UpdateCoordinator::new(LoggingTransport::new(mode), config);
            coordinator.register(device, caps).await;
            coordinator.deploy(policy, &[device]).await
        });
    println!("{}", report);
    if let Some((_, e)) = report.failed().next() {
        return Err(e.clone().into());
    }
    Ok(())
}

fn print_table(policy: &Policy, table: &RuleTable) {
    println!("policy: {}", policy);
    println!("{}", table);
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init_timed();

    let cli = Cli::parse();
    let (policy, device, caps) = prepare(&cli)?;
    let table = compile(&policy, &caps)?;
    info!("{}: {} rules", device, table.len());
    print_table(&policy, &table);

    if cli.apply {
        deploy(&cli, &policy, &device, caps)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_forward() {
        let policy = forward_policy(&ips(&["10.0.0.1", "10.0.0.2"]), 3).unwrap();
        let table = compile(&policy, &DeviceCapability::default()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.rules()[0].actions, ActionSet::forward(3));
        assert!(forward_policy(&ips(&["10.0.0.300"]), 1).is_err());
        assert!(forward_policy(&[], 1).is_err());
    }

    #[test]
    fn test_rewrite() {
        let policy = rewrite_policy(&ips(&["10.0.0.1"]), "00:00:00:00:00:0a", 2).unwrap();
        let table = compile(&policy, &DeviceCapability::default()).unwrap();
        assert_eq!(
            table.rules()[0].actions.to_string(),
            "[modify(dstmac=00:00:00:00:00:0a), forward(2)]"
        );
        assert!(rewrite_policy(&ips(&["10.0.0.1"]), "not-a-mac", 2).is_err());
    }

    #[test]
    fn test_cli_arguments() {
        let cli = Cli::try_parse_from(["fpc", "forward", "--max-rules", "1", "10.0.0.1"]).unwrap();
        let (policy, device, caps) = prepare(&cli).unwrap();
        assert_eq!(device, "s1");
        assert_eq!(caps.max_rules, 1);
        assert!(compile(&policy, &caps).is_err());

        // at least one address is required
        assert!(Cli::try_parse_from(["fpc", "forward"]).is_err());
        assert!(Cli::try_parse_from(["fpc", "rewrite", "00:00:00:00:00:0a"]).is_err());
    }

    #[test]
    fn test_apply() {
        let cli = Cli::try_parse_from(["fpc", "--apply", "forward", "10.0.0.1"]).unwrap();
        let (policy, device, caps) = prepare(&cli).unwrap();
        assert!(deploy(&cli, &policy, &device, caps.clone()).is_ok());
        let tiny = caps.with_max_rules(1);
        assert!(deploy(&cli, &policy, &device, tiny).is_err());
    }
}
