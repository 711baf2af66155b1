#[tokio::main]
async fn main() -> anyhow::Result<()> {
    persona_chat::server::run().await
}
