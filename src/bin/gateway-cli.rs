use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Inspect backend health of a running edge gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Request ID to send, for correlating with gateway logs
    #[arg(long)]
    request_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate health of all backend services
    Health,
    /// Health of a single backend service
    Service {
        /// Service name as configured (e.g. "employee")
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let path = match &cli.command {
        Commands::Health => "/health".to_string(),
        Commands::Service { name } => format!("/health/{name}"),
    };

    let mut request = client.get(format!("{}{}", cli.url.trim_end_matches('/'), path));
    if let Some(id) = &cli.request_id {
        request = request.header("X-Request-ID", id);
    }
    let res = request.send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let request_id = res
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    if !status.is_success() {
        eprintln!("Gateway returned status {status} (request {request_id})");
        std::process::exit(1);
    }
    Ok(())
}
