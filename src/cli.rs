use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

#[cfg(feature = "server")]
use issuemap::config::AppConfig;
use issuemap::convert::RecordFilter;
use issuemap::render::{SvgOptions, render_svg};
#[cfg(feature = "server")]
use issuemap::serve::{ServeArgs, run_serve};
use issuemap::session::MapSession;
use issuemap::upstream::parse_records;

/// Where records come from or where output goes; `-` means the standard
/// stream.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stream {
    Std,
    File(PathBuf),
}

#[derive(Debug, Parser)]
#[command(
    name = "issuemap",
    version,
    about = "Lay out tracker issues as an editable tree diagram."
)]
pub struct Cli {
    /// Tracker API key. Overrides ISSUEMAP_API_KEY / LINEAR_API_KEY.
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the web backend (GraphQL proxy, map API and web UI).
    #[cfg(feature = "server")]
    Serve(ServeArgs),
    /// Render saved records to an SVG tree diagram.
    Render(RenderArgs),
    /// Download every issue from the tracker as JSON.
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Saved records (JSON). Use '-' to read from stdin.
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// Path to the output file. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Background color for the rendered diagram.
    #[arg(short = 'b', long = "background-color", default_value = "white")]
    background_color: String,

    /// Only show issues with this status (repeatable).
    #[arg(long = "status")]
    statuses: Vec<String>,

    /// Only show issues assigned to this person (repeatable).
    #[arg(long = "assignee")]
    assignees: Vec<String>,

    /// Collapse the node with this id (repeatable).
    #[arg(long = "collapse")]
    collapse: Vec<String>,

    /// Leave out collapse controls and reparent connectors.
    #[arg(long = "no-controls", action = ArgAction::SetTrue)]
    no_controls: bool,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Path to the output file. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Stop after this many pages.
    #[arg(long = "max-pages")]
    max_pages: Option<usize>,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

#[cfg(feature = "server")]
pub async fn dispatch() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.token.as_deref());
    match cli.command {
        Command::Serve(args) => run_serve(args, config).await,
        Command::Render(args) => run_render(args),
        Command::Fetch(args) => run_fetch(args, config).await,
    }
}

#[cfg(not(feature = "server"))]
pub fn dispatch_sync() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => run_render(args),
        Command::Fetch(_) => bail!("'fetch' command requires the 'server' feature to be enabled"),
    }
}

#[cfg(feature = "server")]
fn load_config(token: Option<&str>) -> AppConfig {
    let config = AppConfig::default();
    match token {
        Some(token) => config.with_token(token),
        None => config,
    }
}

fn run_render(cli: RenderArgs) -> Result<()> {
    let source = records_source(cli.input.as_deref())?;
    let sink = match cli.output.as_deref() {
        Some(arg) => output_sink(arg)?,
        None => match &source {
            Stream::File(path) => Stream::File(path.with_extension("svg")),
            Stream::Std => Stream::Std,
        },
    };

    let text = read_records(&source)?;
    let records = parse_records(&text).context("failed to parse issue records")?;
    let filter = RecordFilter {
        statuses: cli.statuses.into_iter().collect(),
        assignees: cli.assignees.into_iter().collect(),
    };

    let mut session = MapSession::from_records(records, filter);
    for id in &cli.collapse {
        session
            .toggle_collapse(id)
            .with_context(|| format!("cannot collapse '{id}'"))?;
    }

    let options = SvgOptions {
        background: cli.background_color,
        controls: !cli.no_controls,
        ..SvgOptions::default()
    };
    let svg = render_svg(session.render(), &options)?;
    emit(&sink, svg.as_bytes(), cli.quiet, "diagram")
}

#[cfg(feature = "server")]
async fn run_fetch(cli: FetchArgs, config: AppConfig) -> Result<()> {
    use issuemap::upstream::fetch_all;

    let config = match config.token {
        Some(_) => config,
        None => config.with_token(prompt_for_token()?),
    };
    let client = config.client(None)?;
    let max_pages = cli.max_pages.unwrap_or(config.max_pages);
    let quiet = cli.quiet;

    let summary = fetch_all(&client, max_pages, |count| {
        if !quiet {
            eprint!("\rFetched {count} issues");
        }
    })
    .await
    .context("failed to fetch issues")?;
    if !quiet {
        eprintln!();
        if summary.hit_ceiling {
            eprintln!("Stopped after {} pages; some issues may be missing.", summary.pages);
        }
    }

    let json = serde_json::to_string_pretty(&summary.records)?;
    let sink = match cli.output.as_deref() {
        Some(arg) => output_sink(arg)?,
        None => Stream::Std,
    };
    emit(&sink, json.as_bytes(), quiet, "issues")
}

#[cfg(feature = "server")]
fn prompt_for_token() -> Result<String> {
    use std::io::IsTerminal;

    if !io::stdin().is_terminal() {
        bail!("no API token; pass --token or set ISSUEMAP_API_KEY");
    }
    let token = dialoguer::Password::new()
        .with_prompt("Tracker API key")
        .interact()
        .context("failed to read API key")?;
    Ok(token)
}

fn records_source(arg: Option<&str>) -> Result<Stream> {
    let Some(arg) = arg.filter(|arg| *arg != "-") else {
        return Ok(Stream::Std);
    };
    let path = PathBuf::from(arg);
    if !path.is_file() {
        bail!("input file '{arg}' does not exist");
    }
    Ok(Stream::File(path))
}

fn output_sink(arg: &str) -> Result<Stream> {
    if arg == "-" {
        return Ok(Stream::Std);
    }
    let path = PathBuf::from(arg);
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            bail!("output directory '{}' does not exist", dir.display())
        }
        _ => Ok(Stream::File(path)),
    }
}

fn read_records(source: &Stream) -> Result<String> {
    let text = match source {
        Stream::Std => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read records from stdin")?;
            text
        }
        Stream::File(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?,
    };
    if text.trim().is_empty() {
        bail!("no issue records supplied");
    }
    Ok(text)
}

fn emit(sink: &Stream, bytes: &[u8], quiet: bool, what: &str) -> Result<()> {
    match sink {
        Stream::Std => {
            let mut out = io::stdout().lock();
            out.write_all(bytes)?;
            out.flush()?;
        }
        Stream::File(path) => {
            fs::write(path, bytes)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if !quiet {
                println!("Generated {what} -> {}", path.display());
            }
        }
    }
    Ok(())
}
