use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = interpose::cli::Cli::parse();
    if let Err(e) = interpose::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
