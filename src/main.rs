#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # gradeflow
//!
//! Grades a batch of student hand-ins against an activity rubric. Automatic
//! criteria go to a chat-completion model, the tutor scores the manual ones
//! in hybrid mode, and every outcome lands in an append-only ledger.
//!
//! OpenAI settings are read from the environment (or a `.env` file):
//! `OPENAI_ENDPOINT`, `OPENAI_API_KEY`, `OPENAI_MODEL`.

use std::{io::BufReader, path::PathBuf};

use anyhow::Result;
use bpaf::*;
use dotenvy::dotenv;
use gradeflow::{
    activity::ResolvedActivity,
    config::{GradingConfig, OpenAiEnv},
    discovery::discover,
    evaluate::OpenAiService,
    extract::StandardDecoder,
    feedback::{GradesSummary, load_records},
    manual::TerminalScoreSource,
    pipeline::Pipeline,
};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Arguments of `gradeflow run`.
#[derive(Debug, Clone)]
struct RunArgs {
    /// Course document.
    course:   PathBuf,
    /// Unit number.
    unit:     u32,
    /// Activity id.
    activity: String,
    /// Directory or zip of submissions.
    dir:      PathBuf,
    /// Ask the tutor for the manual criteria.
    hybrid:   bool,
    /// Manual criteria replacing the default list.
    manual:   Vec<String>,
    /// Skip students graded in an earlier run.
    resume:   bool,
    /// Output root override.
    output:   Option<PathBuf>,
    /// Debug logging.
    verbose:  bool,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade a batch
    Run(RunArgs),
    /// Grade again every student with existing feedback
    Reprocess(RunArgs),
    /// List what would be graded
    Discover(PathBuf, bool),
    /// Summarize written feedback
    Summary(PathBuf, bool),
}

impl Cmd {
    /// Whether debug logging was requested.
    fn verbose(&self) -> bool {
        match self {
            Cmd::Run(args) | Cmd::Reprocess(args) => args.verbose,
            Cmd::Discover(_, verbose) | Cmd::Summary(_, verbose) => *verbose,
        }
    }
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    /// parses the verbosity switch
    fn verbose_switch() -> impl Parser<bool> {
        short('v').long("verbose").help("Log debug output").switch()
    }

    /// parses the submissions location
    fn submissions_dir() -> impl Parser<PathBuf> {
        long("dir")
            .help("Directory or .zip archive of submissions")
            .argument::<PathBuf>("DIR")
    }

    /// parses the arguments shared by `run` and `reprocess`
    fn run_args(dir_help: &'static str, resume: impl Parser<bool>) -> impl Parser<RunArgs> {
        let course = long("course")
            .help("Course document (JSON)")
            .argument::<PathBuf>("FILE");
        let unit = long("unit").help("Unit number").argument::<u32>("N");
        let activity = long("activity")
            .help("Activity id within the unit, e.g. 1.3")
            .argument::<String>("ID");
        let dir = long("dir").help(dir_help).argument::<PathBuf>("DIR");
        let hybrid = long("hybrid")
            .help("Score the manual criteria by hand")
            .switch();
        let manual = long("manual")
            .help("Manual criterion; repeat to list several (replaces the default list)")
            .argument::<String>("CRITERION")
            .many();
        let output = long("output")
            .help("Output root (default: outputs, or GRADEFLOW_OUTPUT_DIR)")
            .argument::<PathBuf>("DIR")
            .optional();
        let verbose = verbose_switch();

        construct!(RunArgs {
            course,
            unit,
            activity,
            dir,
            hybrid,
            manual,
            resume,
            output,
            verbose,
        })
    }

    let resume = long("resume")
        .help("Skip students already graded successfully")
        .switch();
    let run = run_args("Directory or .zip archive of submissions", resume)
        .to_options()
        .command("run")
        .help("Grade every submission of an activity")
        .map(Cmd::Run);

    let reprocess = run_args("Directory holding the original submission files", pure(false))
        .to_options()
        .command("reprocess")
        .help("Grade again, with the current rubric and prompt, every student with feedback")
        .map(Cmd::Reprocess);

    let discover_cmd = construct!(Cmd::Discover(submissions_dir(), verbose_switch()))
        .to_options()
        .command("discover")
        .help("Show which file would be graded for each student");

    let summary_dir = long("dir")
        .help("Activity output directory")
        .argument::<PathBuf>("DIR");
    let summary = construct!(Cmd::Summary(summary_dir, verbose_switch()))
        .to_options()
        .command("summary")
        .help("Print the grades written for an activity");

    let cmd = construct!([run, reprocess, discover_cmd, summary]);

    cmd.to_options()
        .descr("Rubric-based grading of written submissions")
        .run()
}

/// Runs a batch and returns whether any submission failed. With
/// `reprocess`, the batch is the set of students with existing feedback and
/// `--dir` holds their original files.
async fn run(args: RunArgs, reprocess: bool) -> Result<bool> {
    let activity = ResolvedActivity::resolve(&args.course, args.unit, &args.activity)?;
    let openai = OpenAiEnv::require()?;

    let mut config = GradingConfig::from_env()
        .with_run_flags(args.hybrid || !args.manual.is_empty(), args.resume);
    if !args.manual.is_empty() {
        config = config.with_manual_override(args.manual);
    }
    if let Some(root) = args.output {
        config = config.with_output_root(root);
    }

    let terminal = TerminalScoreSource::new(BufReader::new(std::io::stdin()), std::io::stdout());
    let mut pipeline = Pipeline::new(
        activity,
        &config,
        OpenAiService::new(openai),
        StandardDecoder::new(config.tool_timeout()),
        terminal,
    )?;

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let summary = if reprocess {
        pipeline.reprocess_until(&args.dir, shutdown).await?
    } else {
        let report = discover(&args.dir, config.tool_timeout()).await?;
        pipeline.run_until(&report, shutdown).await?
    };

    println!("{}", summary.table());
    println!(
        "Run {} {:?}: {} succeeded, {} failed. Output in {}",
        summary.run_id,
        summary.status,
        summary.succeeded,
        summary.failed,
        pipeline.output_dir().display()
    );
    Ok(summary.has_failures())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cmd = options();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let level = if cmd.verbose() { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt)
        .with(LevelFilter::from_level(level))
        .init();

    match cmd {
        Cmd::Run(args) => {
            if run(args, false).await? {
                std::process::exit(1);
            }
        }
        Cmd::Reprocess(args) => {
            if run(args, true).await? {
                std::process::exit(1);
            }
        }
        Cmd::Discover(dir, _) => {
            let report = discover(&dir, GradingConfig::from_env().tool_timeout()).await?;
            println!("{}", report.table());
            if !report.ignored.is_empty() {
                println!("{} unsupported file(s) ignored", report.ignored.len());
            }
        }
        Cmd::Summary(dir, _) => {
            let summary = GradesSummary::new(load_records(&dir)?);
            match summary.stats() {
                None => println!("No feedback records in {}", dir.display()),
                Some((average, min, max)) => {
                    println!("{}", summary.table());
                    println!(
                        "{} student(s): average {average}, min {min}, max {max}",
                        summary.len()
                    );
                }
            }
        }
    };

    Ok(())
}
