mod cli;

use subforged::{
    config,
    conversion::Upload,
    engine::{self, FfmpegEngine},
    server::{self, AppContext},
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting Subforged server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    server::start_server(config).await
}

async fn convert_file(
    file: &Path,
    content_type: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let content_type = content_type.unwrap_or_else(|| guess_content_type(file).to_string());

    let engine = FfmpegEngine::discover(&config.tools)?;
    let ctx = AppContext::build(config, Arc::new(engine))?;

    let id = ctx
        .orchestrator
        .submit(Upload {
            file_name,
            content_type,
            bytes: bytes.into(),
        })
        .await?;
    println!("Conversion {} submitted", id);

    let mut last_progress = None;
    loop {
        let status = ctx.orchestrator.query(id)?;
        if status.progress != last_progress {
            if let Some(progress) = status.progress {
                println!("  {:>3}% ({})", progress, status.state);
            }
            last_progress = status.progress;
        }

        if status.state.is_terminal() {
            if let Some(error) = status.error {
                anyhow::bail!("Conversion failed: {}", error);
            }
            break;
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let artifact = ctx.orchestrator.resolve_artifact(id).await?;
    println!("\nConversion complete!");
    println!("Output: {}", artifact.path.display());
    Ok(())
}

fn guess_content_type(file: &Path) -> &'static str {
    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mpg") | Some("mpeg") | Some("mpe") => "video/mpeg",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "subforged=trace,subforged_common=debug,tower_http=debug".to_string()
        } else {
            "subforged=debug,subforged_common=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Convert { file, content_type } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_file(&file, content_type, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("subforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = engine::check_tools(&config.tools);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing. Install it or set FFMPEG_PATH.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Upload dir: {}", config.storage.upload_dir.display());
    println!("  Output dir: {}", config.storage.output_dir.display());
    println!(
        "  Accepted types: {}",
        config.upload.allowed_content_types.join(", ")
    );
    println!("  Max upload: {} bytes", config.upload.max_upload_bytes);
    println!("  Output format: .{}", config.conversion.output_extension);
    match config.conversion.timeout_secs {
        Some(secs) => println!("  Timeout: {}s", secs),
        None => println!("  Timeout: none"),
    }

    Ok(())
}
