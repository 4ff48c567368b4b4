#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = elevate_cbt::run().await {
        eprintln!("elevate-cbt fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
