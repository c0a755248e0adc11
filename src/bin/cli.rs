use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use darktube::{
    database,
    forms::VIDEO_FIELD,
    session::SessionStore,
    storage::VideoStorage,
    user_storage::UserStorage,
};
use prettytable::{Cell, Row, Table};
use reqwest::multipart::{Form, Part};

#[derive(Parser)]
#[command(name = "darktube")]
#[command(about = "Admin and upload tool for a DarkTube server", long_about = None)]
struct Cli {
    #[arg(long, global = true, env = "DATABASE_URL", default_value = "sqlite://darktube.db", help = "SQLite connection string")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the database tables")]
    InitDb,

    #[command(about = "List registered users")]
    Users,

    #[command(about = "List videos, newest first")]
    Videos {
        #[arg(short, long, help = "Only titles containing this text")]
        query: Option<String>,
    },

    #[command(about = "Delete expired sessions")]
    PurgeSessions,

    #[command(about = "Log in to a running server and upload a video")]
    Upload {
        #[arg(long, default_value = "http://localhost:3000", help = "Server base URL")]
        server: String,

        #[arg(short, long, help = "Username")]
        username: String,

        #[arg(short, long, help = "Password")]
        password: String,

        #[arg(short, long, help = "Video title")]
        title: String,

        #[arg(short, long, help = "Optional description")]
        description: Option<String>,

        #[arg(short, long, help = "Path to the video file")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_command(cli).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::InitDb => {
            database::init(&cli.database_url).await?;
            println!("✅ Tables ready in {}", cli.database_url);
        }
        Commands::Users => {
            let pool = database::init(&cli.database_url).await?;
            list_users(&UserStorage::new(pool)).await?;
        }
        Commands::Videos { query } => {
            let pool = database::init(&cli.database_url).await?;
            list_videos(&VideoStorage::new(pool), query.as_deref()).await?;
        }
        Commands::PurgeSessions => {
            let pool = database::init(&cli.database_url).await?;
            let sessions = SessionStore::new(pool, chrono::Duration::zero());
            let purged = sessions.purge_expired().await?;
            println!("🧹 Removed {} expired session(s)", purged);
        }
        Commands::Upload {
            server,
            username,
            password,
            title,
            description,
            file,
        } => {
            upload(&server, &username, &password, title, description, &file).await?;
        }
    }

    Ok(())
}

async fn list_users(storage: &UserStorage) -> Result<()> {
    let users = storage.list_users().await?;

    if users.is_empty() {
        println!("📭 No users registered yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("ID"), Cell::new("Username"), Cell::new("Videos")]));

    for user in users {
        table.add_row(Row::new(vec![
            Cell::new(&user.id.to_string()),
            Cell::new(&user.username),
            Cell::new(&user.video_count.to_string()),
        ]));
    }

    table.printstd();
    Ok(())
}

async fn list_videos(storage: &VideoStorage, query: Option<&str>) -> Result<()> {
    let videos = storage.list_videos(query.filter(|q| !q.is_empty())).await?;

    if videos.is_empty() {
        println!("📭 No videos found.");
        return Ok(());
    }

    println!("\n🎬 Videos ({})\n", videos.len());

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Title"),
        Cell::new("File"),
        Cell::new("Uploader"),
        Cell::new("Uploaded"),
    ]));

    for video in videos {
        let uploaded = video.upload_date.with_timezone(&Local);
        table.add_row(Row::new(vec![
            Cell::new(&video.id.to_string()),
            Cell::new(&video.title),
            Cell::new(&video.filename),
            Cell::new(&video.uploader),
            Cell::new(&uploaded.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]));
    }

    table.printstd();
    println!();
    Ok(())
}

/// The server answers form posts with redirects, so success is judged by
/// where the redirect chain ends.
async fn upload(
    server: &str,
    username: &str,
    password: &str,
    title: String,
    description: Option<String>,
    file: &Path,
) -> Result<()> {
    let server = server.trim_end_matches('/');
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .post(format!("{}/login", server))
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .context("Failed to connect to the server. Is it running?")?;

    if !response.status().is_success() || response.url().path() != "/" {
        bail!("Login failed for {}", username);
    }

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let size = bytes.len();

    let mut form = Form::new()
        .percent_encode_noop()
        .text("title", title.clone())
        .part(VIDEO_FIELD, Part::bytes(bytes).file_name(file_name.clone()));
    if let Some(description) = description {
        form = form.text("description", description);
    }

    let response = client
        .post(format!("{}/upload", server))
        .multipart(form)
        .send()
        .await
        .context("Upload request failed")?;

    if !response.status().is_success() || response.url().path() != "/" {
        bail!("Server rejected the upload of {} (see the upload page for details)", file_name);
    }

    println!("✅ Video uploaded successfully!");
    println!("🎬 Title: {}", title);
    println!("📄 File: {} ({:.2} MB)", file_name, size as f64 / (1024.0 * 1024.0));

    Ok(())
}
