use anyhow::Result;
use clap::Parser;
use minimr::standalone::engine::{perform_map, perform_reduce};
use minimr::standalone::{Args, Commands, Job};
use minimr::{workload, Workload};

fn parse_args() -> (Job, Option<u32>) {
    let args = Args::parse();
    match args.command {
        Commands::Submit {
            input,
            workload,
            output,
            n_reduce,
            args,
        } => (
            Job {
                input,
                workload,
                output,
                args,
            },
            n_reduce,
        ),
    }
}

fn run_standalone_mr_job(job: Job, engine: Workload, n_reduce: u32) -> Result<()> {
    let aux = serde_json::to_string(&job.args)?;
    // The map pass performs the shuffle as well, which is all the
    // shuffle there is in a single-process run.
    let buckets = perform_map(&job, &engine, &aux, n_reduce)?;
    perform_reduce(&job, &engine, &aux, n_reduce, buckets)
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let (job, n_reduce) = parse_args();
    let engine = workload::named(&job.workload)?;
    run_standalone_mr_job(job, engine, n_reduce.unwrap_or(1))
}
