//! RagBuddy - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use ragbuddy::{
    cli::{init_logging, Args, Commands, Verbosity},
    rag::{AskRequest, AskResponse, IngestReport, RagOrchestrator, StreamingAnswer},
    Config,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let verbosity = args.verbosity();
    init_logging(verbosity);

    if let Commands::Config { init } = &args.command {
        return show_config(&args, *init);
    }

    let config = load_config(&args)?;

    match &args.command {
        Commands::Ingest { path } => {
            let rag = build_orchestrator(&config).await?;
            run_ingest(&rag, path, verbosity).await?;
        }
        Commands::Ask {
            query,
            sources,
            top_k,
            template,
            show_context,
        } => {
            let rag = build_orchestrator(&config).await?;
            let mut request = AskRequest::new(query.clone());
            if !sources.is_empty() {
                request = request.with_scope(sources.iter().cloned());
            }
            if let Some(k) = top_k {
                request = request.with_top_k(*k);
            }
            if let Some(name) = template {
                request = request.with_template(name.clone());
            }

            let response = rag.ask(request).await.context("Failed to answer question")?;
            print_response(&response, *show_context, verbosity);
        }
        Commands::Chat { sources } => {
            let rag = build_orchestrator(&config).await?;
            run_chat(&rag, sources, verbosity).await?;
        }
        Commands::Remove { source } => {
            let rag = build_orchestrator(&config).await?;
            let removed = rag
                .remove_source(source)
                .await
                .with_context(|| format!("Failed to remove source {}", source))?;
            println!("{} Removed {} chunk(s) of {}", "✓".green(), removed, source);
        }
        Commands::Stats => {
            let rag = build_orchestrator(&config).await?;
            show_stats(&rag).await;
        }
        // Handled above, before any configuration is loaded
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.clone()).context("Failed to load configuration")?;
    if let Some(index) = &args.index {
        config.index.path = index.display().to_string();
    }
    Ok(config)
}

async fn build_orchestrator(config: &Config) -> Result<RagOrchestrator> {
    RagOrchestrator::from_config(config)
        .await
        .context("Failed to initialise the RAG pipeline")
}

async fn run_ingest(rag: &RagOrchestrator, path: &Path, verbosity: Verbosity) -> Result<()> {
    let report = if path.is_dir() {
        let pb = if verbosity.show_progress() {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .context("Invalid progress template")?
                .progress_chars("█▓░"),
        );

        let report = rag
            .ingest_folder_with(path, |progress| {
                pb.set_length(progress.total as u64);
                pb.set_position(progress.position as u64 - 1);
                let name = progress
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                pb.set_message(name);
            })
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?;

        pb.finish_and_clear();
        report
    } else {
        rag.ingest_file(path)
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?
    };

    print_ingest_report(&report, verbosity);
    Ok(())
}

fn print_ingest_report(report: &IngestReport, verbosity: Verbosity) {
    println!(
        "{} Indexed {} chunk(s) from {} file(s)",
        "✓".green(),
        report.chunks_added(),
        report.files.len()
    );

    if verbosity.show_details() {
        for file in &report.files {
            println!("  {} {} ({} chunks)", "•".cyan(), file.source_id, file.chunks);
        }
        for path in &report.skipped {
            println!("  {} {} (unsupported type)", "-".dimmed(), path.display());
        }
    }

    for (path, reason) in &report.failed {
        eprintln!("  {} {}: {}", "✗".red(), path.display(), reason);
    }
}

fn print_response(response: &AskResponse, show_context: bool, verbosity: Verbosity) {
    if show_context {
        println!("{}", "Context:".bold());
        println!("{}", response.context.dimmed());
        println!();
    }

    println!("{}", response.answer);

    if verbosity.show_details() {
        print_flags(
            response.degraded,
            response.scope_fallback,
            response.rerank_fallback.as_ref().map(ToString::to_string),
        );
        print_sources(response.passages.iter().map(|p| (p.source_id.as_str(), p.similarity)));
    }

    if verbosity.show_trace() {
        let trace: Vec<String> = response.trace.iter().map(|s| format!("{:?}", s)).collect();
        eprintln!("{} {}", "trace:".dimmed(), trace.join(" → ").dimmed());
    }
}

fn print_flags(degraded: bool, scope_fallback: bool, rerank_fallback: Option<String>) {
    if degraded {
        eprintln!("{}", "Note: no relevant passages were found; answer is not grounded in the corpus".yellow());
    }
    if scope_fallback {
        eprintln!("{}", "Note: requested sources are not indexed; searched the whole corpus".yellow());
    }
    if let Some(reason) = rerank_fallback {
        eprintln!("{} {}", "Note: re-ranking skipped:".yellow(), reason.yellow());
    }
}

fn print_sources<'a>(sources: impl Iterator<Item = (&'a str, f32)>) {
    let sources: Vec<(&str, f32)> = sources.collect();
    if sources.is_empty() {
        return;
    }
    println!();
    println!("{}", "Sources:".bold());
    for (i, (source, similarity)) in sources.iter().enumerate() {
        println!("  [{}] {} ({:.2})", i + 1, source, similarity);
    }
}

async fn run_chat(rag: &RagOrchestrator, sources: &[String], verbosity: Verbosity) -> Result<()> {
    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragbuddy")
        .join("history");

    let mut editor = DefaultEditor::new().context("Failed to start line editor")?;
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
    }

    let mut conversation_id = uuid::Uuid::new_v4().to_string();
    let stats = rag.stats().await;

    println!("{}", "RagBuddy chat".bold().cyan());
    println!(
        "{} chunk(s) from {} source(s) indexed. Commands: /clear, /stats, /exit",
        stats.chunks,
        stats.sources.len()
    );
    println!();

    loop {
        let line = match editor.readline(&format!("{} ", ">".cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("Use /exit to quit");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Readline error"),
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        match input {
            "/exit" | "/quit" => break,
            "/clear" => {
                rag.clear_conversation(&conversation_id);
                conversation_id = uuid::Uuid::new_v4().to_string();
                println!("{}", "Conversation cleared".dimmed());
                continue;
            }
            "/stats" => {
                show_stats(rag).await;
                continue;
            }
            _ => {}
        }

        let mut request = AskRequest::new(input).with_conversation(conversation_id.clone());
        if !sources.is_empty() {
            request = request.with_scope(sources.iter().cloned());
        }

        match rag.ask_stream(request).await {
            Ok(answer) => {
                if let Err(e) = stream_answer(answer, verbosity).await {
                    eprintln!("\n{} {:#}", "Error:".red(), e);
                }
            }
            Err(e) => eprintln!("{} {}", "Error:".red(), e),
        }
        println!();
    }

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);
    Ok(())
}

async fn stream_answer(answer: StreamingAnswer, verbosity: Verbosity) -> Result<()> {
    let StreamingAnswer {
        passages,
        degraded,
        scope_fallback,
        rerank_fallback,
        mut stream,
        ..
    } = answer;

    let mut stdout = std::io::stdout();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment.context("Answer stream interrupted")?;
        print!("{}", fragment);
        stdout.flush().context("Failed to write answer")?;
    }
    println!();

    if verbosity.show_details() {
        print_flags(degraded, scope_fallback, rerank_fallback.as_ref().map(ToString::to_string));
        print_sources(passages.iter().map(|p| (p.source_id.as_str(), p.similarity)));
    }
    if verbosity.show_trace() {
        let trace: Vec<String> = stream.trace().iter().map(|s| format!("{:?}", s)).collect();
        eprintln!("{} {}", "trace:".dimmed(), trace.join(" → ").dimmed());
    }
    Ok(())
}

async fn show_stats(rag: &RagOrchestrator) {
    let stats = rag.stats().await;

    println!("{}", "Index".bold());
    println!("  Location:   {}", stats.index_path.display());
    println!("  Chunks:     {}", stats.chunks);
    println!("  Dimension:  {}", stats.dimension);
    println!("  Sources:    {}", stats.sources.len());
    for source in &stats.sources {
        println!("    {} {}", "•".cyan(), source);
    }
    println!("  Conversations in memory: {}", stats.conversations);
}

fn show_config(args: &Args, init: bool) -> Result<()> {
    let path = args
        .config
        .clone()
        .or_else(Config::default_path)
        .context("Cannot determine configuration path")?;

    if init {
        let created = Config::init_file(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if created {
            println!("{} Wrote {}", "✓".green(), path.display());
        } else {
            println!("{} {} already exists", "Note:".yellow(), path.display());
        }
    }

    let config = load_config(args)?;
    println!("{} {}", "Configuration file:".bold(), path.display());
    println!();
    let shown = toml::to_string_pretty(&config.redacted()).context("Failed to render configuration")?;
    println!("{}", shown);
    Ok(())
}
