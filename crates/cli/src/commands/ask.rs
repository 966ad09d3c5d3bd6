//! `quill ask` — Run one prompt through the generation loop.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quill_agent::{AgentLoop, AgentInput, AgentStreamEvent};
use quill_config::AppConfig;
use quill_core::agent::{Attachment, Credentials, ThinkingMode};
use quill_core::memory::MemoryStore;
use quill_memory::{FileStore, NoopMemory};
use quill_providers::BackendSet;
use tokio_util::sync::CancellationToken;

pub struct AskArgs {
    pub prompt: String,
    pub model: Option<String>,
    pub thinking: ThinkingMode,
    pub files: Vec<PathBuf>,
    pub json: bool,
}

pub async fn run(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if config.gemini.api_key.is_none() && config.openai.api_key.is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    GEMINI_API_KEY=...   (native models: gemini, gemma, learnlm)");
        eprintln!("    OPENAI_API_KEY=...   (any other model)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let attachments = args
        .files
        .iter()
        .map(|path| read_attachment(path))
        .collect::<Result<Vec<_>, _>>()?;

    let backends = BackendSet::from_config(&config);
    let agent = AgentLoop::from_config(&config, backends).with_memory(build_memory(&config));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let stream_text = !args.json;
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                AgentStreamEvent::Chunk { content } if stream_text => {
                    let _ = write!(stdout, "{content}");
                    let _ = stdout.flush();
                }
                AgentStreamEvent::Notice { message } => eprintln!("\n  [{message}]"),
                AgentStreamEvent::ActionChanged { action, prompt } => {
                    eprintln!("\n  → {action}: {prompt}");
                }
                _ => {}
            }
        }
    });

    let mut input = AgentInput::new(args.prompt)
        .with_thinking_mode(args.thinking)
        .with_credentials(Credentials {
            user_id: "local".into(),
            ..Credentials::default()
        })
        .with_events(tx)
        .with_cancel(cancel);
    if let Some(model) = args.model {
        input = input.with_model(model);
    }
    for attachment in attachments {
        input = input.with_attachment(attachment);
    }

    let result = agent.run(input).await;
    let _ = printer.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    if result.stopped {
        eprintln!("\n  [stopped]");
    }
    if let Some(record) = result.records.first() {
        if record.payload.is_some() {
            eprintln!("\n  Handoff: {}", result.final_action);
        }
        if !record.citations.is_empty() {
            println!("\nSources:");
            for (i, citation) in record.citations.iter().enumerate() {
                println!("  [{}] {} — {}", i + 1, citation.title, citation.url);
            }
        }
    }

    Ok(())
}

fn build_memory(config: &AppConfig) -> Arc<dyn MemoryStore> {
    match config.memory.backend.as_str() {
        "file" => Arc::new(FileStore::new(config.memory_path())),
        _ => Arc::new(NoopMemory),
    }
}

fn read_attachment(path: &Path) -> Result<Attachment, String> {
    let data =
        std::fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment::new(name, guess_mime_type(path), data))
}

/// MIME type from the file extension; unknown extensions are binary.
fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "rs" | "py" | "go" | "c" | "h" | "cpp" | "java" | "sh" | "ts" => "text/plain",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}
