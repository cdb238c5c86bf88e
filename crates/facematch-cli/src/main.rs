use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[zbus::proxy(
    interface = "org.facematch.FaceMatch1",
    default_service = "org.facematch.FaceMatch1",
    default_path = "/org/facematch/FaceMatch1"
)]
trait FaceMatch {
    async fn encode(&self, request: &str) -> zbus::Result<(u16, String)>;
    async fn match_face(&self, request: &str) -> zbus::Result<(u16, String)>;
    async fn verify(&self, request: &str) -> zbus::Result<(u16, String)>;
    async fn health(&self) -> zbus::Result<(u16, String)>;
}

#[derive(Parser)]
#[command(name = "facematch", about = "Face encoding, matching and verification via facematchd")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the face signature of an image
    Encode {
        image: PathBuf,
        /// Emit a gallery entry for this user id instead of the raw reply
        #[arg(long)]
        user_id: Option<String>,
        /// Display name for the gallery entry
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Identify the face in an image against a gallery file
    Match {
        image: PathBuf,
        /// JSON array of { "userId", "name", "encoding" } entries
        #[arg(short, long)]
        gallery: PathBuf,
    },
    /// Check whether two images show the same person
    Verify { image1: PathBuf, image2: PathBuf },
    /// Show daemon health
    Health,
}

fn read_image_b64(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn read_gallery(path: &Path) -> Result<Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let gallery: Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    if !gallery.is_array() {
        bail!("{}: gallery must be a JSON array", path.display());
    }
    Ok(gallery)
}

/// Turn an encode reply into a gallery entry.
fn gallery_entry(reply: &Value, user_id: &str, name: &str) -> Result<Value> {
    let encoding = reply
        .get("encoding")
        .filter(|e| e.is_array())
        .context("encode reply has no encoding")?;
    Ok(json!({ "userId": user_id, "name": name, "encoding": encoding }))
}

/// Pretty-print the reply body and turn non-2xx statuses into an error.
fn finish(status: u16, body: &str) -> Result<()> {
    let parsed: Value = serde_json::from_str(body).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    if !(200..300).contains(&status) {
        bail!("facematchd returned status {status}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = FaceMatchProxy::new(&connection)
        .await
        .context("facematchd is not reachable")?;

    match cli.command {
        Commands::Encode {
            image,
            user_id,
            name,
        } => {
            let request = json!({ "image": read_image_b64(&image)? }).to_string();
            tracing::debug!(len = request.len(), "sending encode request");
            let (status, body) = proxy.encode(&request).await?;
            match user_id {
                Some(id) if status == 200 => {
                    let reply: Value = serde_json::from_str(&body)?;
                    let entry = gallery_entry(&reply, &id, &name)?;
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                    Ok(())
                }
                _ => finish(status, &body),
            }
        }
        Commands::Match { image, gallery } => {
            let request = json!({
                "captured": read_image_b64(&image)?,
                "stored": read_gallery(&gallery)?,
            })
            .to_string();
            let (status, body) = proxy.match_face(&request).await?;
            finish(status, &body)
        }
        Commands::Verify { image1, image2 } => {
            let request = json!({
                "image1": read_image_b64(&image1)?,
                "image2": read_image_b64(&image2)?,
            })
            .to_string();
            let (status, body) = proxy.verify(&request).await?;
            finish(status, &body)
        }
        Commands::Health => {
            let (status, body) = proxy.health().await?;
            finish(status, &body)
        }
    }
}
