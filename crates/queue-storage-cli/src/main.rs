use queue_storage_cli::run_cli;

#[tokio::main]
async fn main() {
    // Run CLI and exit with a code matching the error type
    if let Err(e) = run_cli().await {
        eprintln!("queue-storage: {e}");
        std::process::exit(e.exit_code());
    }
}
