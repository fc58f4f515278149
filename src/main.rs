use confab::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_main().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
