#[tokio::main]
async fn main() -> anyhow::Result<()> {
    video_call_lib::run().await
}
