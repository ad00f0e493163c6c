use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    hintbridge::cli::run().await
}
