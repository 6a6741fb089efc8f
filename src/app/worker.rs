use anyhow::Result;
use clap::Parser;
use minimr::cmd::worker::Args;
use minimr::{worker, workload};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let join = args.join.unwrap_or_else(|| "127.0.0.1:50051".into());
    let workload = workload::named(&args.workload)?;
    let aux = serde_json::to_string(&args.args)?;

    worker::run(format!("http://{join}"), workload, aux, ".").await
}
