use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face enrollment and recognition CLI")]
struct Cli {
    /// Base URL of a running rollcalld.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit enrollment photos for a subject
    Enroll {
        /// Subject name (alphanumeric)
        #[arg(short, long)]
        nome: String,
        /// Image files to submit, one save each
        images: Vec<PathBuf>,
    },
    /// Recognize the subject in a photo
    Recognize { image: PathBuf },
    /// Poll the name last recognized by the live loop
    Poll,
    /// Force a full retrain from the stored enrollment images
    Train,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Enroll { nome, images } => {
            for path in images {
                let body = serde_json::json!({ "nome": nome, "imagem": data_url(&path)? });
                let resp: Value = client
                    .post(format!("{}/salvar_foto", cli.server))
                    .json(&body)
                    .send()
                    .await?
                    .json()
                    .await?;
                println!("{}: {resp}", path.display());
            }
        }
        Commands::Recognize { image } => {
            let body = serde_json::json!({ "imagem": data_url(&image)? });
            let resp: Value = client
                .post(format!("{}/reconhecer_foto", cli.server))
                .json(&body)
                .send()
                .await?
                .json()
                .await?;
            println!("{resp}");
        }
        Commands::Poll => {
            let resp: Value = client
                .get(format!("{}/get_recognized_name", cli.server))
                .send()
                .await?
                .json()
                .await?;
            println!("{resp}");
        }
        Commands::Train => {
            let resp: Value = client
                .post(format!("{}/treinar", cli.server))
                .send()
                .await?
                .json()
                .await?;
            println!("{resp}");
        }
    }

    Ok(())
}

/// Encode an image file as the base64 data URL the endpoints expect.
fn data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}
