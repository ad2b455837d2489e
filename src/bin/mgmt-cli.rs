use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "mgmt-cli")]
#[command(about = "Client for the multiplexer management server", long_about = None)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 12720)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered inputs
    Config,
    /// Show buffer and level statistics (resets them)
    Values,
    /// Show the health state of every input
    State,
    /// Fetch the live configuration document
    GetPtree,
    /// Push a configuration document from a JSON file
    SetPtree { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let request = match &cli.command {
        Commands::Config => "config\n".to_string(),
        Commands::Values => "values\n".to_string(),
        Commands::State => "state\n".to_string(),
        Commands::GetPtree => "getptree\n".to_string(),
        Commands::SetPtree { file } => {
            // The server reads the document as a single line.
            let document: Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            format!("setptree\n{}\n", serde_json::to_string(&document)?)
        }
    };

    let stream = TcpStream::connect((cli.host.as_str(), cli.port)).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut banner = String::new();
    reader.read_line(&mut banner).await?;
    eprint!("{}", banner);

    writer.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;
    print_response(&response)?;
    Ok(())
}

fn print_response(response: &str) -> Result<(), Box<dyn std::error::Error>> {
    if response.trim().is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<Value>(response) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => print!("{}", response),
    }
    Ok(())
}
