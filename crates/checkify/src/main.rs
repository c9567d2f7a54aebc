//! Command-line front end for the Checked C migration pipeline.

use anyhow::Context;
use checkify_analysis::prelude::{QualifierStats, SolutionVerifier, WildReport};
use checkify_core::prelude::{
    CheckifyConfig, OutputMode, Phase, Pipeline, PipelineOutcome, RunSummary,
};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "checkify",
    version,
    about = "Infer Checked C pointer qualifiers for legacy C and rewrite declarations in place"
)]
struct Cli {
    /// C translation units to convert together as one program.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Write `foo.c` to `foo.<postfix>.c` instead of overwriting.
    #[arg(long, default_value = "checked", conflicts_with_all = ["in_place", "stdout"])]
    output_postfix: String,

    /// Overwrite the input files.
    #[arg(long, conflicts_with = "stdout")]
    in_place: bool,

    /// Print rewritten units to standard output.
    #[arg(long)]
    stdout: bool,

    /// Require all inputs to live under this directory.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Rewrite Arr and NtArr sites too, not just Ptr.
    #[arg(long)]
    alltypes: bool,

    /// Wrap safe statement runs in `_Checked { }` blocks (needs --alltypes).
    #[arg(long)]
    addcr: bool,

    /// Let constraints flow through annotated external interfaces.
    #[arg(long)]
    enable_itypeprop: bool,

    /// Match printf-family variadic calls structurally instead of tainting.
    #[arg(long)]
    handle_varargs: bool,

    /// JSON interface profile merged over the built-in libc table.
    #[arg(long)]
    interface_profile: Option<PathBuf>,

    /// Dump the constraint store as JSON before solving.
    #[arg(long)]
    constraint_output: Option<PathBuf>,

    /// Write intermediate artifacts and run the post-solve verifier.
    /// The constraint dump defaults to `checkify_constraints.json`.
    #[arg(long)]
    dump_intermediate: bool,

    /// Write per-level statistics to this file after solving.
    #[arg(long)]
    stats_output: Option<PathBuf>,

    /// Write the Wild root-cause report to this file after solving.
    #[arg(long)]
    wildptrstats_output: Option<PathBuf>,

    /// Print statistics to standard output after solving.
    #[arg(long)]
    dump_stats: bool,

    /// Verbose logging (equivalent to RUST_LOG=debug).
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> (CheckifyConfig, ReportOptions) {
        let output = if self.stdout {
            OutputMode::Stdout
        } else if self.in_place {
            OutputMode::InPlace
        } else {
            OutputMode::Postfix(self.output_postfix.clone())
        };
        let reports = ReportOptions {
            stats_output: self.stats_output.clone(),
            wild_stats_output: self.wildptrstats_output.clone(),
            dump_stats: self.dump_stats,
            verify: self.dump_intermediate,
        };
        let constraint_output = self.constraint_output.or_else(|| {
            self.dump_intermediate
                .then(|| PathBuf::from("checkify_constraints.json"))
        });
        let config = CheckifyConfig {
            files: self.files,
            base_dir: self.base_dir,
            all_levels: self.alltypes,
            add_checked_regions: self.addcr,
            propagate_through_itypes: self.enable_itypeprop,
            handle_varargs: self.handle_varargs,
            interface_profile: self.interface_profile,
            output,
            constraint_output,
            stats_output: reports.stats_output.clone(),
            wild_stats_output: reports.wild_stats_output.clone(),
        };
        (config, reports)
    }
}

struct ReportOptions {
    stats_output: Option<PathBuf>,
    wild_stats_output: Option<PathBuf>,
    dump_stats: bool,
    verify: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (config, reports) = cli.into_config();
    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let mut stats: Option<QualifierStats> = None;
    let outcome = pipeline.run_with(|solved| {
        if reports.verify {
            for violation in SolutionVerifier::check(solved) {
                eprintln!("{} {violation:?}", "verification:".yellow().bold());
            }
        }
        let collected = QualifierStats::collect(solved);
        if let Some(path) = &reports.stats_output {
            std::fs::write(path, collected.to_json()?)
                .with_context(|| format!("writing stats to {}", path.display()))?;
        }
        if let Some(path) = &reports.wild_stats_output {
            let report = WildReport::collect(solved);
            std::fs::write(path, report.to_json()?)
                .with_context(|| format!("writing wild-pointer report to {}", path.display()))?;
        }
        if reports.dump_stats {
            println!("{}", collected.to_json()?);
        }
        stats = Some(collected);
        Ok(())
    });

    match outcome {
        PipelineOutcome::Success(summary) => {
            print_summary(&summary, stats.as_ref());
            ExitCode::SUCCESS
        }
        PipelineOutcome::Failed { phase, reason } => {
            let phase = match phase {
                Phase::Build => "build",
                Phase::Solve => "solve",
                Phase::Rewrite => "rewrite",
            };
            eprintln!("{} {phase} phase failed: {reason}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn print_summary(summary: &RunSummary, stats: Option<&QualifierStats>) {
    println!(
        "{} {} file(s), {} pointer variable(s), {} constraint(s), {} solver step(s)",
        "converted".green().bold(),
        summary.files,
        summary.variables,
        summary.constraints,
        summary.solver_iterations
    );
    if let Some(stats) = stats {
        let totals = &stats.totals;
        println!(
            "  {} ptr, {} arr, {} ntarr, {} wild ({:.1}% checked)",
            totals.ptr,
            totals.arr,
            totals.ntarr,
            totals.wild.to_string().red(),
            stats.checked_ratio() * 100.0
        );
    }
}
