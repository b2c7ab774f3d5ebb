use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    solkit_cli::run().await
}
