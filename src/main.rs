#[tokio::main]
async fn main() {
    if let Err(e) = famulus::bootstrap::run().await {
        eprintln!("fatal: {:#}", e);
        std::process::exit(1);
    }
}
