mod config;
mod render;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use carousel_core::{
    AspectRatio, ContextKey, RunInput, RunStatus, DEFAULT_PERSONA, DEFAULT_SLIDE_COUNT,
    MAX_SLIDE_COUNT,
};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use events::{Event, EventEnvelope};
use futures::{Stream, StreamExt};
use orchestrator::artifacts::{ArtifactManager, CONVERTED_DOCUMENT, IMAGES_DIR, PRIMARY_DOCUMENT};
use orchestrator::stages::{ResearchFindings, ResearchStage};
use orchestrator::tools::{GeminiClient, HttpDocumentConverter, PythonSandbox};
use orchestrator::{ApprovalHandle, ExecutionEngine, RunSession, SubmitOutcome, Toolset};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{CarouselConfig, CAROUSEL_DIR, CONFIG_FILE};

#[derive(Parser)]
#[command(name = "carousel")]
#[command(about = "Research a topic and turn it into a slide document", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write .carousel/config.toml with defaults
    Init,
    /// Run the pipeline for one topic
    Generate(GenerateArgs),
    /// Research a topic and print the findings, without visuals or documents
    Research(ResearchArgs),
    /// List the artifacts currently in the output directory
    Status {
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Default)]
struct GenerateArgs {
    /// Topic to research; prompted for when omitted
    topic: Option<String>,

    #[arg(short, long)]
    slides: Option<u32>,

    /// 16:9, 9:16 or 1:1
    #[arg(short, long)]
    aspect: Option<AspectRatio>,

    #[arg(short, long)]
    persona: Option<String>,

    #[arg(long)]
    auto_approve: bool,

    #[arg(long, value_name = "SECS")]
    approval_timeout: Option<u64>,

    /// Also ask for approval after research and visual design
    #[arg(long)]
    extended_review: bool,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ResearchArgs {
    topic: String,

    #[arg(short, long)]
    slides: Option<u32>,

    #[arg(short, long)]
    persona: Option<String>,

    /// Print the findings payload as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => init_project().await.map(|_| ExitCode::SUCCESS),
        Some(Commands::Generate(args)) => generate(args).await,
        Some(Commands::Research(args)) => research(args).await,
        Some(Commands::Status { output, json }) => {
            status(output, json).await.map(|_| ExitCode::SUCCESS)
        }
        None => generate(GenerateArgs::default()).await,
    }
}

async fn init_project() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config_path = CarouselConfig::path(&cwd);

    if config_path.exists() {
        println!("Project already initialized at {}", config_path.display());
        return Ok(());
    }

    println!("Initializing Carousel in {}", cwd.display());

    tokio::fs::create_dir_all(cwd.join(CAROUSEL_DIR)).await?;
    let content = CarouselConfig::default().to_toml()?;
    tokio::fs::write(&config_path, content)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!();
    println!("Created:");
    println!("  {}/", CAROUSEL_DIR);
    println!("  └── {}", CONFIG_FILE);
    println!();
    println!("Next steps:");
    println!("  1. Put GEMINI_API_KEY in .env (or gemini.api_key in the config)");
    println!("  2. Start a document converter at the configured converter.url");
    println!("  3. Run 'carousel generate \"your topic\"'");

    Ok(())
}

async fn generate(args: GenerateArgs) -> Result<ExitCode> {
    init_tracing();

    let cwd = std::env::current_dir()?;
    let mut config = CarouselConfig::load(&cwd).await?;
    if let Some(dir) = &args.output {
        config.output.dir = dir.clone();
    }
    if args.auto_approve {
        config.approval.auto_approve = true;
    }
    if let Some(secs) = args.approval_timeout {
        config.approval.timeout_secs = Some(secs);
    }

    let mut lines = spawn_stdin_reader();
    let input = collect_input(&args, &mut lines).await?;

    let api_key = config.gemini.api_key.clone().context(
        "GEMINI_API_KEY is not set. Add it to .env or set gemini.api_key in .carousel/config.toml",
    )?;
    let engine = ExecutionEngine::new(
        config.engine_config(args.extended_review),
        build_toolset(&config, api_key),
    );

    tracing::info!(
        output = %config.output.dir.display(),
        text_model = %config.gemini.text_model,
        image_model = %config.gemini.image_model,
        "Starting generation"
    );

    let handle = engine.start(input).context("Failed to start run")?;
    let approvals = handle.approvals().clone();
    let cancel = handle.cancellation().clone();

    let renderer = tokio::spawn(render_events(handle.events()));
    let replies = tokio::spawn(forward_replies(lines, approvals));
    let interrupts = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling... press Ctrl-C again to exit immediately");
            cancel.cancel("interrupted by user");
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    let session = handle.wait().await?;
    let _ = renderer.await;
    replies.abort();
    interrupts.abort();

    print_summary(&session);

    Ok(if session.status == RunStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn research(args: ResearchArgs) -> Result<ExitCode> {
    init_tracing();

    let cwd = std::env::current_dir()?;
    let config = CarouselConfig::load(&cwd).await?;
    let input = RunInput::new(args.topic)
        .with_slide_count(args.slides.unwrap_or(DEFAULT_SLIDE_COUNT))
        .with_persona(args.persona.unwrap_or_else(|| DEFAULT_PERSONA.to_string()))
        .validated()
        .context("Invalid input")?;

    let api_key = config.gemini.api_key.clone().context(
        "GEMINI_API_KEY is not set. Add it to .env or set gemini.api_key in .carousel/config.toml",
    )?;

    // Research writes no files; a scratch root keeps the output directory untouched
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let mut engine_config = config.engine_config(false);
    engine_config.artifact_dir = scratch.path().to_path_buf();
    let engine = ExecutionEngine::with_stages(
        engine_config,
        build_toolset(&config, api_key),
        vec![Arc::new(ResearchStage::new())],
    );

    let session = engine.run(input).await?;
    if let Some(failure) = &session.failure {
        eprintln!(
            "{} [{}] {}",
            "Research failed:".red().bold(),
            failure.kind,
            failure.message
        );
        return Ok(ExitCode::FAILURE);
    }

    let findings: ResearchFindings = session
        .context
        .get_as(&ContextKey::FINDINGS)
        .context("Research produced no findings")??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else {
        print_findings(&findings);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_findings(findings: &ResearchFindings) {
    println!();
    println!("{}", findings.topic.bold());
    for (i, finding) in findings.findings.iter().enumerate() {
        println!();
        println!("{}. {}", i + 1, finding.headline.bold());
        println!("   {}", finding.summary);
        if let Some(statistic) = &finding.statistic {
            println!("   {}", statistic.cyan());
        }
        if let Some(source) = &finding.source {
            println!("   {}", source.dimmed());
        }
    }
    if !findings.citations.is_empty() {
        println!();
        println!("Sources:");
        for citation in &findings.citations {
            println!("  {} {}", citation.title, citation.uri.dimmed());
        }
    }
    println!();
}

fn build_toolset(config: &CarouselConfig, api_key: String) -> Toolset {
    let gemini = Arc::new(
        GeminiClient::new(api_key)
            .with_base_url(&config.gemini.base_url)
            .with_text_model(&config.gemini.text_model)
            .with_image_model(&config.gemini.image_model),
    );
    let sandbox = Arc::new(PythonSandbox::new(&config.sandbox.interpreter));
    let converter = Arc::new(
        HttpDocumentConverter::new(&config.converter.url)
            .with_api_key(config.converter.api_key.clone()),
    );
    Toolset::new(gemini.clone(), sandbox, gemini, converter)
}

/// Read stdin on a dedicated thread so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

async fn ask(
    lines: &mut mpsc::UnboundedReceiver<String>,
    question: &str,
    default: Option<&str>,
) -> Result<String> {
    match default {
        Some(default) => print!("{} {}: ", question, format!("[{}]", default).dimmed()),
        None => print!("{}: ", question),
    }
    std::io::stdout().flush()?;

    let answer = lines.recv().await.context("stdin closed")?;
    let answer = answer.trim();
    Ok(if answer.is_empty() {
        default.unwrap_or_default().to_string()
    } else {
        answer.to_string()
    })
}

/// Build the run input from flags, prompting for anything missing when no
/// topic was given on the command line.
async fn collect_input(
    args: &GenerateArgs,
    lines: &mut mpsc::UnboundedReceiver<String>,
) -> Result<RunInput> {
    let interactive = args.topic.is_none();

    let topic = match &args.topic {
        Some(topic) => topic.clone(),
        None => loop {
            let topic = ask(lines, "Topic", None).await?;
            if !topic.is_empty() {
                break topic;
            }
        },
    };

    let slide_count = match args.slides {
        Some(count) => count,
        None if interactive => loop {
            let default = DEFAULT_SLIDE_COUNT.to_string();
            match ask(lines, "Slides", Some(&default)).await?.parse::<u32>() {
                Ok(count) if (1..=MAX_SLIDE_COUNT).contains(&count) => break count,
                _ => println!("Enter a whole number from 1 to {}", MAX_SLIDE_COUNT),
            }
        },
        None => DEFAULT_SLIDE_COUNT,
    };

    let aspect_ratio = match args.aspect {
        Some(aspect) => aspect,
        None if interactive => loop {
            let default = AspectRatio::default().to_string();
            match ask(lines, "Aspect ratio (16:9, 9:16, 1:1)", Some(&default))
                .await?
                .parse()
            {
                Ok(aspect) => break aspect,
                Err(e) => println!("{}", e),
            }
        },
        None => AspectRatio::default(),
    };

    let persona = match &args.persona {
        Some(persona) => persona.clone(),
        None if interactive => ask(lines, "Audience", Some(DEFAULT_PERSONA)).await?,
        None => DEFAULT_PERSONA.to_string(),
    };

    let input = RunInput::new(topic)
        .with_slide_count(slide_count)
        .with_aspect_ratio(aspect_ratio)
        .with_persona(persona)
        .validated()
        .context("Invalid input")?;
    Ok(input)
}

async fn render_events(events: impl Stream<Item = EventEnvelope>) {
    let mut events = std::pin::pin!(events);
    while let Some(envelope) = events.next().await {
        let Some(line) = render::render(&envelope) else {
            continue;
        };
        match envelope.event {
            // Leave the cursor on the prompt line
            Event::ApprovalRequested { .. } | Event::ApprovalReprompted { .. } => {
                print!("{}", line);
                let _ = std::io::stdout().flush();
            }
            _ => println!("{}", line),
        }
    }
}

async fn forward_replies(mut lines: mpsc::UnboundedReceiver<String>, approvals: ApprovalHandle) {
    while let Some(line) = lines.recv().await {
        if let SubmitOutcome::NoPendingRequest = approvals.submit(&line) {
            if !line.trim().is_empty() {
                eprintln!("{}", "No approval is pending; input ignored".dimmed());
            }
        }
    }
}

fn print_summary(session: &RunSession) {
    println!();
    println!("Run:     {}", session.id);
    println!("Status:  {}", session.status.as_str());
    println!("Output:  {}", session.artifact_dir.display());

    if !session.artifacts.is_empty() {
        println!();
        println!("Artifacts ({}):", session.artifacts.len());
        for artifact in &session.artifacts {
            println!("  {} {}", artifact.produced_by.as_str().dimmed(), artifact.name);
        }
    }

    let retried = session.invocations.iter().filter(|i| i.attempts > 1).count();
    if retried > 0 {
        println!();
        println!("{} tool call(s) needed retries", retried);
    }

    if let Some(failure) = &session.failure {
        println!();
        println!("{} [{}] {}", "Reason:".bold(), failure.kind, failure.message);
    }
    println!();
}

#[derive(Debug, Serialize)]
struct ArtifactEntry {
    name: String,
    bytes: u64,
}

async fn list_artifacts(dir: &Path) -> Result<Vec<ArtifactEntry>> {
    let mut entries = Vec::new();
    for name in [PRIMARY_DOCUMENT, CONVERTED_DOCUMENT] {
        if let Ok(meta) = tokio::fs::metadata(dir.join(name)).await {
            entries.push(ArtifactEntry {
                name: name.to_string(),
                bytes: meta.len(),
            });
        }
    }

    let images_dir = ArtifactManager::new(dir).images_dir();
    let mut images = Vec::new();
    if let Ok(mut read_dir) = tokio::fs::read_dir(&images_dir).await {
        while let Some(entry) = read_dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                images.push(ArtifactEntry {
                    name: format!("{}/{}", IMAGES_DIR, file_name),
                    bytes: meta.len(),
                });
            }
        }
    }
    images.sort_by(|a, b| a.name.cmp(&b.name));
    entries.extend(images);
    Ok(entries)
}

async fn status(output: Option<PathBuf>, json: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config = CarouselConfig::load(&cwd).await?;
    let dir = output.unwrap_or(config.output.dir);

    let artifacts = list_artifacts(&dir).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(());
    }

    println!();
    println!("Output: {}", dir.display());
    println!();
    if artifacts.is_empty() {
        println!("No artifacts yet.");
    } else {
        for artifact in &artifacts {
            println!("  {:<32} {:>10} bytes", artifact.name, artifact.bytes);
        }
    }
    println!();

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carousel=info,orchestrator=info".into()),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn replies(answers: &[&str]) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        for answer in answers {
            tx.send(answer.to_string()).unwrap();
        }
        rx
    }

    #[test]
    fn test_cli_parses_generate_flags() {
        let cli = Cli::try_parse_from([
            "carousel",
            "generate",
            "Grid storage",
            "--slides",
            "4",
            "--aspect",
            "9:16",
            "--auto-approve",
        ])
        .unwrap();

        let Some(Commands::Generate(args)) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.topic.as_deref(), Some("Grid storage"));
        assert_eq!(args.slides, Some(4));
        assert_eq!(args.aspect, Some(AspectRatio::Portrait));
        assert!(args.auto_approve);
    }

    #[test]
    fn test_cli_parses_research() {
        let cli =
            Cli::try_parse_from(["carousel", "research", "Heat pumps", "-s", "3", "--json"])
                .unwrap();

        let Some(Commands::Research(args)) = cli.command else {
            panic!("expected research");
        };
        assert_eq!(args.topic, "Heat pumps");
        assert_eq!(args.slides, Some(3));
        assert!(args.json);
        assert!(Cli::try_parse_from(["carousel", "research"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_aspect() {
        assert!(Cli::try_parse_from(["carousel", "generate", "x", "--aspect", "4:3"]).is_err());
    }

    #[tokio::test]
    async fn test_interactive_input_uses_defaults() {
        let mut lines = replies(&["", "Heat pumps", "seven", "0", "13", "3", "", "Installers"]);
        let input = collect_input(&GenerateArgs::default(), &mut lines)
            .await
            .unwrap();

        assert_eq!(input.topic, "Heat pumps");
        assert_eq!(input.slide_count, 3);
        assert_eq!(input.aspect_ratio, AspectRatio::Landscape);
        assert_eq!(input.audience_persona, "Installers");
    }

    #[tokio::test]
    async fn test_flags_skip_prompts() {
        let args = GenerateArgs {
            topic: Some("Heat pumps".to_string()),
            ..GenerateArgs::default()
        };
        let mut lines = replies(&[]);
        let input = collect_input(&args, &mut lines).await.unwrap();

        assert_eq!(input.slide_count, DEFAULT_SLIDE_COUNT);
        assert_eq!(input.audience_persona, DEFAULT_PERSONA);
    }

    #[tokio::test]
    async fn test_list_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::write(root.join("report.pdf"), b"%PDF").unwrap();
        std::fs::write(root.join("images/slide_02.png"), b"b").unwrap();
        std::fs::write(root.join("images/cover.png"), b"a").unwrap();

        let names: Vec<_> = list_artifacts(root)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["report.pdf", "images/cover.png", "images/slide_02.png"]);
    }
}
