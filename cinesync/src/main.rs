#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cinesync::run_cli().await
}
