use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Port for the coordinator to listen on
    #[clap(short = 'P', long)]
    pub port: Option<u16>,

    /// Number of reduce tasks (fan-out of the job)
    #[clap(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub n_reduce: Option<u32>,

    /// Input files, one map task each
    #[clap(required = true)]
    pub files: Vec<String>,
}
