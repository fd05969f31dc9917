#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    recamp::start_server().await
}
