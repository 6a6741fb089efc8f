use anyhow::Result;
use clap::Parser;
use minimr::cmd::coordinator::Args;
use minimr::coordinator;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let port = args.port.unwrap_or(50051);
    let n_reduce = args.n_reduce.unwrap_or(10);

    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    coordinator::serve(listener, args.files, n_reduce).await
}
