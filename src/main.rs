//! iBoot Patcher CLI
//!
//! Command-line tool for patching decrypted 32-bit iBoot images.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use iboot_patcher::{read_image, write_image, Features, PatchOptions, PatchReport, Patcher};
use std::path::PathBuf;
use std::process::ExitCode;

/// Thumb-2 patcher for 32-bit iBoot images.
///
/// Bypasses signature checks and optionally replaces boot-args, forces
/// debugging on and enables UART output.
#[derive(Parser, Debug)]
#[command(name = "ibootpatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Decrypted input image
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the patched image
    #[arg(short, long)]
    output: PathBuf,

    /// Replacement boot-args string
    #[arg(short, long, env = "IBOOTPATCH_BOOT_ARGS")]
    boot_args: Option<String>,

    /// Force the debug-enabled check to succeed
    #[arg(short, long)]
    debug: bool,

    /// Enable UART output
    #[arg(short = 'u', long)]
    uarts: bool,

    /// Leave signature checks in place
    #[arg(long)]
    no_sigcheck: bool,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only report errors)
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON patch report
    Json,
}

impl Args {
    fn options(&self) -> PatchOptions {
        let mut features = Features::empty();
        features.set(Features::SIGCHECK, !self.no_sigcheck);
        features.set(Features::BOOT_ARGS, self.boot_args.is_some());
        features.set(Features::DEBUG_ENABLED, self.debug);
        features.set(Features::DEBUG_UARTS, self.uarts);
        PatchOptions {
            features,
            boot_args: self.boot_args.clone(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        "iboot_patcher=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let data = read_image(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let mut patcher = Patcher::new(&data)
        .with_context(|| format!("parsing {}", args.input.display()))?;

    let skipped = patcher.apply(&args.options())?;
    let report = patcher.report(skipped);

    write_image(&args.output, patcher.patched())
        .with_context(|| format!("writing {}", args.output.display()))?;

    match args.format {
        OutputFormat::Human => print_human(&report, args),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_human(report: &PatchReport, args: &Args) {
    if args.quiet {
        return;
    }

    println!("Image: {}", args.input.display());
    println!("  Load address: 0x{:08X}", report.load_address);
    println!("  Version:      {}", report.version);
    println!("  Generation:   {}", report.generation.number());
    println!("  Kernel load:  {}", if report.kernel_load { "yes" } else { "no" });

    if !report.applied.is_empty() {
        println!("Applied:");
        for record in &report.applied {
            println!("  {record}");
        }
    }
    for skip in &report.skipped {
        println!("  {} is a work in progress: {}", skip.sequence, skip.reason);
    }
    println!("Wrote {}", args.output.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["ibootpatch", "-i", "in.dec", "-o", "out.bin"]).unwrap();
        assert_eq!(args.input, PathBuf::from("in.dec"));
        assert!(!args.verbose);
        assert_eq!(args.options().features, Features::SIGCHECK);
    }

    #[test]
    fn test_feature_flags() {
        let args = Args::try_parse_from([
            "ibootpatch",
            "-i",
            "in.dec",
            "-o",
            "out.bin",
            "-b",
            "rd=md0 -v",
            "-d",
            "-u",
            "--no-sigcheck",
        ])
        .unwrap();
        let options = args.options();
        assert_eq!(
            options.features,
            Features::BOOT_ARGS | Features::DEBUG_ENABLED | Features::DEBUG_UARTS
        );
        assert_eq!(options.boot_args.as_deref(), Some("rd=md0 -v"));
    }

    #[test]
    fn test_format_options() {
        let args =
            Args::try_parse_from(["ibootpatch", "-i", "a", "-o", "b", "-f", "json"]).unwrap();
        assert!(matches!(args.format, OutputFormat::Json));
    }

    #[test]
    fn test_requires_paths() {
        assert!(Args::try_parse_from(["ibootpatch", "-i", "a"]).is_err());
        assert!(Args::try_parse_from(["ibootpatch", "-i", "a", "-o", "b", "-v", "-q"]).is_err());
    }
}
