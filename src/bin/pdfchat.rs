//! CLI binary for edgequake-pdfchat.
//!
//! A thin shim over the library crate: maps CLI flags to `SessionConfig`,
//! drives a `Viewer` and a `ChatSession`, and prints bubbles.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdfchat::{
    export_flat, export_structured, write_export, Bubble, ChatError, ChatSession, DisplaySize,
    DragGesture,
    Effect, PayloadPolicy, Point, SessionConfig, SessionState, Transcript, Viewer,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Page count and sizes (no API key needed)
  pdfchat inspect bracket.pdf

  # One question about a region of page 2 (raster pixels at --scale)
  pdfchat ask bracket.pdf --page 2 --region 120,80,300,220 "What is the bore tolerance?"

  # Interactive session, resumed from an earlier export
  pdfchat chat bracket.pdf --history chat.json

  # HTTP endpoint for a browser front end
  pdfchat serve --addr 127.0.0.1:3000

CHAT COMMANDS:
  /page N           go to page N
  /next, /prev      page forward / back
  /zoom in|out|S    zoom by one step or to scale S
  /select X Y W H   capture a region (raster pixels); attached to the next message
  /back             drop the captured region
  /edit N TEXT      replace the text of assistant turn N
  /clear            clear the conversation (the system prompt stays)
  /history          reprint the conversation
  /export PATH      write the conversation; PATH ending in .txt writes the flat Q/A dump
  /quit             leave

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
"#;

/// Chat with a vision LLM about regions of engineering drawings.
#[derive(Parser, Debug)]
#[command(
    name = "pdfchat",
    version,
    about = "Chat with a vision LLM about regions of PDF engineering drawings",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFCHAT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFCHAT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print page count and page sizes.
    Inspect {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Output JSON instead of a table.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Ask one question, optionally about a region of a page.
    Ask {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// The question.
        question: String,

        /// 1-based page to capture from.
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Region as X,Y,W,H in raster pixels at the initial scale.
        #[arg(long, value_parser = parse_region)]
        region: Option<Region>,

        /// Write the conversation here afterwards (.txt → flat dump).
        #[arg(short, long)]
        export: Option<PathBuf>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Interactive chat session.
    Chat {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Resume from a structured export.
        #[arg(long, env = "PDFCHAT_HISTORY")]
        history: Option<PathBuf>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Serve POST /api/chat.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "PDFCHAT_ADDR", default_value = "127.0.0.1:3000")]
        addr: String,

        #[command(flatten)]
        session: SessionArgs,
    },
}

/// Flags shared by every subcommand that builds a session.
#[derive(Args, Debug)]
struct SessionArgs {
    /// LLM model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFCHAT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per reply.
    #[arg(long, env = "PDFCHAT_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// Retries per request on LLM failure.
    #[arg(long, env = "PDFCHAT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Upper bound on one request, retries included, in seconds.
    #[arg(long, env = "PDFCHAT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Which turns to send with each request.
    #[arg(long, env = "PDFCHAT_PAYLOAD", value_enum, default_value = "full")]
    payload: PayloadArg,

    /// Initial zoom scale.
    #[arg(long, env = "PDFCHAT_SCALE", default_value_t = 1.5)]
    scale: f32,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDFCHAT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PayloadArg {
    /// Every turn so far.
    Full,
    /// System turn plus the newest user turn.
    Latest,
}

impl From<PayloadArg> for PayloadPolicy {
    fn from(v: PayloadArg) -> Self {
        match v {
            PayloadArg::Full => PayloadPolicy::FullTranscript,
            PayloadArg::Latest => PayloadPolicy::LatestTurn,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

fn parse_region(s: &str) -> std::result::Result<Region, String> {
    let v: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("'{p}': {e}")))
        .collect::<std::result::Result<_, _>>()?;
    match v.as_slice() {
        [x, y, w, h] => Ok(Region {
            x: *x,
            y: *y,
            w: *w,
            h: *h,
        }),
        _ => Err(format!("expected X,Y,W,H, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The REPL and the spinner own the terminal; keep library chatter down
    // unless asked. `serve` has no spinner, so it logs at info.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if matches!(cli.command, Command::Serve { .. }) {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Inspect {
            input,
            json,
            session,
        } => {
            let config = build_config(&session).await?;
            run_inspect(&input, json, &config).await
        }
        Command::Ask {
            input,
            question,
            page,
            region,
            export,
            session,
        } => {
            let config = build_config(&session).await?;
            run_ask(&input, &question, page, region, export, &config, cli.quiet).await
        }
        Command::Chat {
            input,
            history,
            session,
        } => {
            let config = build_config(&session).await?;
            run_chat(&input, history, &config).await
        }
        Command::Serve { addr, session } => {
            let config = build_config(&session).await?;
            run_serve(&addr, config).await
        }
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────

async fn run_inspect(input: &str, json: bool, config: &SessionConfig) -> Result<()> {
    let viewer = Viewer::open(input, config)
        .await
        .context("Failed to open PDF")?;
    let count = viewer.state().page_count;
    let sizes: Vec<_> = (1..=count).filter_map(|p| viewer.page_size(p)).collect();

    if json {
        let doc = serde_json::json!({
            "input": input,
            "page_count": count,
            "pages": sizes,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).context("Failed to serialize page info")?
        );
        return Ok(());
    }

    println!("File:   {}", input);
    println!("Pages:  {}", count);
    for (i, size) in sizes.iter().enumerate() {
        let (w, h) = size.raster_dimensions(config.initial_scale);
        println!(
            "  {:>3}  {:>7.1} × {:<7.1} pt  {}",
            i + 1,
            size.width,
            size.height,
            dim(&format!("{w}×{h} px @ {:.2}", config.initial_scale))
        );
    }
    Ok(())
}

async fn run_ask(
    input: &str,
    question: &str,
    page: usize,
    region: Option<Region>,
    export: Option<PathBuf>,
    config: &SessionConfig,
    quiet: bool,
) -> Result<()> {
    let mut session = ChatSession::from_config(config).context("Failed to set up LLM provider")?;

    if let Some(region) = region {
        let mut viewer = Viewer::open(input, config)
            .await
            .context("Failed to open PDF")?;
        let req = viewer.go_to_page(page)?;
        viewer.drain(req).await.context("Failed to render page")?;
        let artifact = select(&mut viewer, region).await?;
        if !quiet {
            eprintln!(
                "{} captured {}×{} px from page {}",
                cyan("◆"),
                artifact.width,
                artifact.height,
                page
            );
        }
        session.attach(artifact)?;
    }

    let effects = send(&mut session, question, quiet).await?;
    print_new_bubbles(&session, &effects);

    if let Some(path) = export {
        export_to(&session, &path).await?;
    }
    Ok(())
}

async fn run_chat(input: &str, history: Option<PathBuf>, config: &SessionConfig) -> Result<()> {
    let mut viewer = Viewer::open(input, config)
        .await
        .context("Failed to open PDF")?;
    let first = viewer.request_current();
    viewer.drain(first).await.context("Failed to render page")?;

    let mut session = match history {
        Some(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let transcript = Transcript::from_export(&bytes).context("Failed to import history")?;
            let service = edgequake_pdfchat::LlmCompletionService::from_config(config)
                .context("Failed to set up LLM provider")?;
            ChatSession::restore(config, std::sync::Arc::new(service), transcript)
        }
        None => ChatSession::from_config(config).context("Failed to set up LLM provider")?,
    };

    eprintln!(
        "{} {}  {}",
        cyan("◆"),
        bold(input),
        dim(&format!("{} pages · /quit to leave", viewer.state().page_count))
    );
    for bubble in session.bubbles() {
        print_bubble(&bubble);
    }
    print_view(&viewer);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", bold("›"));
        io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handle_line(line, &mut viewer, &mut session).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("{} {:#}", red("✗"), e),
        }
    }
    Ok(())
}

async fn run_serve(addr: &str, config: SessionConfig) -> Result<()> {
    let service = edgequake_pdfchat::LlmCompletionService::from_config(&config)
        .context("Failed to set up LLM provider")?;
    let state = edgequake_pdfchat::server::AppState {
        config,
        service: std::sync::Arc::new(service),
    };
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    edgequake_pdfchat::server::serve(listener, state)
        .await
        .context("Server error")
}

// ── REPL ─────────────────────────────────────────────────────────────────

/// Handle one REPL line. `Ok(false)` ends the session.
async fn handle_line(line: &str, viewer: &mut Viewer, session: &mut ChatSession) -> Result<bool> {
    let Some(cmd) = line.strip_prefix('/') else {
        let effects = send(session, line, false).await?;
        print_new_bubbles(session, &effects);
        return Ok(true);
    };

    let (name, rest) = cmd.split_once(' ').unwrap_or((cmd, ""));
    let rest = rest.trim();
    match name {
        "quit" | "exit" => return Ok(false),
        "page" => {
            let page: usize = rest.parse().context("usage: /page N")?;
            let req = match viewer.go_to_page(page) {
                Ok(req) => req,
                Err(e) => match navigation_hint(&e) {
                    Some(hint) => {
                        eprintln!("{}", dim(&hint));
                        None
                    }
                    None => return Err(e.into()),
                },
            };
            viewer.drain(req).await?;
            print_view(viewer);
        }
        "next" => {
            let req = viewer.next_page();
            viewer.drain(req).await?;
            print_view(viewer);
        }
        "prev" => {
            let req = viewer.prev_page();
            viewer.drain(req).await?;
            print_view(viewer);
        }
        "zoom" => {
            let req = match rest {
                "in" => viewer.zoom_in(),
                "out" => viewer.zoom_out(),
                s => viewer.set_scale(s.parse().context("usage: /zoom in|out|SCALE")?),
            };
            viewer.drain(req).await?;
            print_view(viewer);
        }
        "select" => {
            let region = parse_region(&rest.replace(' ', ","))
                .map_err(anyhow::Error::msg)
                .context("usage: /select X Y W H")?;
            let artifact = select(viewer, region).await?;
            eprintln!(
                "{} captured {}×{} px; it goes with your next message",
                green("✓"),
                artifact.width,
                artifact.height
            );
            session.attach(artifact)?;
        }
        "back" => {
            session.dismiss_capture()?;
            eprintln!("{}", dim("capture dropped"));
        }
        "edit" => {
            let (index, text) = rest.split_once(' ').context("usage: /edit N TEXT")?;
            let index: usize = index.parse().context("usage: /edit N TEXT")?;
            session.edit(index, text.trim())?;
            if let Some(b) = session.bubbles().into_iter().find(|b| b.index == index) {
                print_bubble(&b);
            }
        }
        "clear" => {
            session.clear()?;
            eprintln!("{}", dim("conversation cleared"));
        }
        "history" => {
            for bubble in session.bubbles() {
                print_bubble(&bubble);
            }
        }
        "export" => {
            if rest.is_empty() {
                bail!("usage: /export PATH");
            }
            export_to(session, Path::new(rest)).await?;
        }
        other => bail!("unknown command /{other}"),
    }
    Ok(true)
}

/// Capture `region` (raster pixels) from the current page.
async fn select(
    viewer: &mut Viewer,
    region: Region,
) -> Result<edgequake_pdfchat::Artifact> {
    let raster = viewer.ensure_rendered().await?;
    // the terminal has no layout of its own: display size == raster size
    let display = DisplaySize {
        width: raster.width() as f32,
        height: raster.height() as f32,
    };
    let mut drag = DragGesture::start(Point::new(region.x, region.y));
    drag.update(Point::new(region.x + region.w, region.y + region.h));
    Ok(viewer.capture(drag, display)?)
}

/// Submit with a spinner on stderr.
async fn send(session: &mut ChatSession, text: &str, quiet: bool) -> Result<Vec<Effect>> {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    };
    bar.set_message("waiting for reply…");
    let result = session.submit(text).await;
    bar.finish_and_clear();
    Ok(result?)
}

async fn export_to(session: &ChatSession, path: &Path) -> Result<()> {
    let flat = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
    let bytes = if flat {
        export_flat(session.transcript(), session.controller().last_artifact())
    } else {
        export_structured(session.transcript())?
    };
    write_export(path, &bytes)
        .await
        .with_context(|| format!("Failed to export to {}", path.display()))?;
    eprintln!("{} wrote {}", green("✔"), path.display());
    Ok(())
}

// ── Output ───────────────────────────────────────────────────────────────

fn print_new_bubbles(session: &ChatSession, effects: &[Effect]) {
    let bubbles = session.bubbles();
    for effect in effects {
        match effect {
            Effect::Appended { index } => {
                if let Some(b) = bubbles.iter().find(|b| b.index == *index) {
                    if b.editable {
                        print_bubble(b);
                    }
                }
            }
            Effect::StateChanged(SessionState::Error(msg)) => {
                eprintln!("{} {}", red("✗"), dim(msg));
            }
            _ => {}
        }
    }
}

fn print_bubble(b: &Bubble) {
    let images = if b.image_count > 0 {
        dim(&format!(" [{} image]", b.image_count))
    } else {
        String::new()
    };
    let speaker = if b.editable {
        cyan(&b.speaker)
    } else {
        bold(&b.speaker)
    };
    println!(
        "{} {}{}: {}",
        dim(&format!("#{}", b.index)),
        speaker,
        images,
        b.text.as_deref().unwrap_or("")
    );
}

/// Out-of-range navigation keeps the current page and only earns a hint.
fn navigation_hint(err: &ChatError) -> Option<String> {
    match err {
        ChatError::PageOutOfRange { page, total } => {
            Some(format!("(no page {page}; the drawing has pages 1-{total})"))
        }
        _ => None,
    }
}

fn print_view(viewer: &Viewer) {
    let s = viewer.state();
    let raster = s
        .raster_size
        .map(|(w, h)| format!("{w}×{h} px"))
        .unwrap_or_else(|| "not rendered".to_string());
    eprintln!(
        "{}",
        dim(&format!(
            "page {}/{} · scale {:.2} · {}",
            s.page, s.page_count, s.scale, raster
        ))
    );
}

// ── Config ───────────────────────────────────────────────────────────────

async fn build_config(args: &SessionArgs) -> Result<SessionConfig> {
    let mut builder = SessionConfig::builder()
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .max_retries(args.max_retries)
        .request_timeout_secs(args.api_timeout)
        .payload_policy(args.payload.clone().into())
        .initial_scale(args.scale);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt: {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_page_is_a_hint_not_an_error() {
        let hint = navigation_hint(&ChatError::PageOutOfRange { page: 99, total: 3 }).unwrap();
        assert!(hint.contains("1-3"));
        assert!(navigation_hint(&ChatError::NothingRendered).is_none());
    }
}
