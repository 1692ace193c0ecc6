#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use fbd_harness::{CrashSession, SweepConfig, Workload};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("sweep") => sweep(&args[1..]),
        Some("session") => session(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn sweep(args: &[String]) -> Result<()> {
    let [config_path, dir] = args else {
        bail!("usage: fbd-harness sweep <config.json> <dir>");
    };
    let config = SweepConfig::load(Path::new(config_path))?;
    let report = config.run(Path::new(dir))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed() {
        bail!(
            "power-loss sweep reported {} mismatching cut point(s)",
            report.failed_cases
        );
    }
    Ok(())
}

fn session(args: &[String]) -> Result<()> {
    let [config_path, image, cycles] = args else {
        bail!("usage: fbd-harness session <config.json> <image> <power-cycles>");
    };
    let mut config = SweepConfig::load(Path::new(config_path))?;
    config.device.power_cycles = cycles.parse().context("invalid <power-cycles> value")?;
    let workload = Workload::generate(config.seed, &config.device.geometry, config.op_count)?;
    let report = CrashSession::run(&config.device, Path::new(image), &workload.ops)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_usage() {
    println!("fbd-harness: power-loss crash testing for the flash test device");
    println!();
    println!("USAGE:");
    println!("  fbd-harness sweep <config.json> <dir>");
    println!("  fbd-harness session <config.json> <image> <power-cycles>");
    println!();
    println!("SWEEP:");
    println!("  Generates a seeded workload and cuts power after write 1, 2, ... max_cycles,");
    println!("  one image per cut point under <dir>. Each survivor must match a replay of");
    println!("  exactly the writes that completed. Prints a JSON report.");
    println!();
    println!("SESSION:");
    println!("  Runs the workload once against <image> with the given countdown and prints");
    println!("  the per-block digests of what survived.");
    println!();
    println!("CONFIG (JSON, every field optional):");
    println!("  {{\"device\": {{\"geometry\": {{...}}, \"erase_cycles\": 0, ...}},");
    println!("   \"seed\": 1, \"op_count\": 200, \"max_cycles\": 64}}");
    println!();
    println!("Set RUST_LOG=debug for per-operation tracing on stderr.");
}
