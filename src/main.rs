#[tokio::main]
async fn main() {
    let status = jobqueue::app::startup::startup().await;
    std::process::exit(status);
}
