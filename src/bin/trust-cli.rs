use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "trust-cli")]
#[command(about = "Management CLI for the device trust service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "DEVICE_TRUST_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service status and active policy flags
    Status,
    /// Device, event and ban counters
    Stats,
    /// Show a device record
    Device { id: String },
    /// Authorize a device
    Authorize {
        id: String,
        #[arg(short, long, default_value = "cli")]
        operator: String,
    },
    /// Block a device
    Block {
        id: String,
        #[arg(short, long, default_value = "cli")]
        operator: String,
    },
    /// Recent security events, most recent first
    Events {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long)]
        device: Option<String>,
        /// Minimum severity
        #[arg(short, long)]
        severity: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Stats => client.get(format!("{base}/admin/stats")),
        Commands::Device { id } => client.get(format!("{base}/api/device/{id}")),
        Commands::Authorize { id, operator } => client
            .post(format!("{base}/api/device/{id}/authorize"))
            .header("x-operator", operator),
        Commands::Block { id, operator } => client
            .post(format!("{base}/api/device/{id}/block"))
            .header("x-operator", operator),
        Commands::Events {
            limit,
            device,
            severity,
        } => {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }
            if let Some(device) = device {
                query.push(("deviceId", device));
            }
            if let Some(severity) = severity {
                query.push(("severity", severity));
            }
            client
                .get(format!("{base}/api/security/events"))
                .query(&query)
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or(text);

    if status.is_success() {
        println!("{body}");
        Ok(())
    } else {
        eprintln!("Error: service returned status {status}");
        eprintln!("{body}");
        std::process::exit(1);
    }
}
