use std::path::PathBuf;

use anyhow::{bail, Result};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub once: bool,
    pub interval: Option<u64>,
    pub help: bool,
}

/// Parse command-line flags.
///
/// Supported forms:
///   worksync
///   worksync --once
///   worksync --config /etc/worksync.toml --interval 600
pub fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i]));
                } else {
                    bail!("Missing value for --config flag");
                }
            }
            "--interval" => {
                i += 1;
                if i < args.len() {
                    let seconds: u64 = args[i]
                        .parse()
                        .map_err(|_| anyhow::anyhow!("Invalid --interval value: {}", args[i]))?;
                    if seconds == 0 {
                        bail!("--interval must be at least 1 second");
                    }
                    parsed.interval = Some(seconds);
                } else {
                    bail!("Missing value for --interval flag");
                }
            }
            "--once" => parsed.once = true,
            "-h" | "--help" => parsed.help = true,
            other => bail!("Unknown argument: {other}\n\nRun worksync --help for usage"),
        }
        i += 1;
    }

    Ok(parsed)
}

pub fn print_help() {
    println!("worksync — periodic work-item reconciliation between two trackers\n");
    println!("USAGE:");
    println!("  worksync [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config <path>   Config file (default ~/.worksync/config.toml)");
    println!("      --once            Run a single cycle and exit");
    println!("      --interval <s>    Seconds between cycles (overrides config)");
    println!("  -h, --help            Show this help");
}
