#[tokio::main]
async fn main() -> eyre::Result<()> {
    cloud_messaging::run().await
}
