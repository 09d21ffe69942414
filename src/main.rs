#[tokio::main]
async fn main() {
    if let Err(e) = membership_backend::run().await {
        eprintln!("membership-backend failed to start: {}", e);
        std::process::exit(1);
    }
}
