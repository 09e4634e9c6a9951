use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use exif_edit::codec;
use exif_edit::config;
use exif_edit::pipeline::{LoadedImage, Transcoder};
use exif_edit::present;

#[derive(Parser, Debug)]
#[command(
    name = "exif-edit",
    version,
    about = "Show and edit EXIF metadata — JPEG/PNG/WebP in-process, HEIC through exiftool"
)]
struct Cli {
    /// Image file to show or edit
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Set a tag, e.g. --set Exif.Image.Artist="Jane Doe" (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Set a tag from a base64-encoded value (repeatable)
    #[arg(long = "set-base64", value_name = "KEY=B64")]
    set_base64: Vec<String>,

    /// Set the title, encoded the way the target format expects
    #[arg(long, value_name = "TEXT")]
    title: Option<String>,

    /// Set the GPS position in decimal degrees, e.g. --gps=-33.8568,151.2153
    #[arg(long, value_name = "LAT,LON")]
    gps: Option<String>,

    /// Show every raw tag instead of the summary
    #[arg(long)]
    raw: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    let Some(path) = cli.path.as_deref() else {
        anyhow::bail!("No input file specified. Use --help for usage.");
    };

    let config = config::Config::load(cli.config.as_deref())?;
    let transcoder = Transcoder::from_config(&config);

    let mut image = transcoder.load(path)?;

    // Collect edits
    for assignment in &cli.set {
        let (key, value) = parse_assignment(assignment)?;
        image.snapshot.apply_edit(key, value);
    }
    for assignment in &cli.set_base64 {
        let (key, value) = parse_assignment(assignment)?;
        let value = codec::from_base64(value)
            .with_context(|| format!("Cannot decode base64 value for {key}"))?;
        image.snapshot.apply_edit(key, value);
    }
    if let Some(ref title) = cli.title {
        let edit = image
            .fields()
            .into_iter()
            .find(|f| f.key == Some(present::KEY_TITLE))
            .and_then(|f| f.encode_edit(title));
        if let Some((key, raw)) = edit {
            image.snapshot.apply_edit(key, raw);
        }
    }
    if let Some(ref gps) = cli.gps {
        let (lat, lon) = parse_position(gps)?;
        for (key, raw) in present::gps_edits(lat, lon)? {
            image.snapshot.apply_edit(key, raw);
        }
    }

    if image.snapshot.has_pending_edits() {
        transcoder.commit(path, image.snapshot.pending_edits())?;
        let written = image.snapshot.drain_edits();
        log::info!("Wrote {} tag(s) to {}", written.len(), path.display());
        image = transcoder.load(path)?;
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&image, cli.raw))?);
    } else if cli.raw {
        print_raw(&image);
    } else {
        print_fields(&image);
    }

    transcoder.shutdown();
    Ok(())
}

/// Split `KEY=VALUE` at the first `=`.
fn parse_assignment(s: &str) -> Result<(&str, &str)> {
    let (key, value) = s
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got {s:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Empty tag key in {s:?}");
    }
    Ok((key, value))
}

/// Parse `LAT,LON` in decimal degrees.
fn parse_position(s: &str) -> Result<(f64, f64)> {
    let (lat, lon) = s
        .split_once(',')
        .with_context(|| format!("Expected LAT,LON, got {s:?}"))?;
    let lat = lat.trim().parse().with_context(|| format!("Bad latitude in {s:?}"))?;
    let lon = lon.trim().parse().with_context(|| format!("Bad longitude in {s:?}"))?;
    Ok((lat, lon))
}

fn to_json(image: &LoadedImage, raw: bool) -> serde_json::Value {
    if raw {
        // Values with control characters (NULs, byte soup) go out as base64
        let tags: serde_json::Map<String, serde_json::Value> = image
            .snapshot
            .tags()
            .iter()
            .map(|(k, v)| {
                let v = if v.chars().any(char::is_control) {
                    codec::to_base64(v)
                } else {
                    v.clone()
                };
                (k.clone(), serde_json::Value::String(v))
            })
            .collect();
        serde_json::json!({
            "path": image.path.display().to_string(),
            "info": image.info,
            "tags": tags,
        })
    } else {
        serde_json::json!({
            "path": image.path.display().to_string(),
            "backend": format!("{:?}", image.backend),
            "info": image.info,
            "fields": image.fields(),
        })
    }
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print the display fields, one section per field.
fn print_fields(image: &LoadedImage) {
    println!();
    println!("{BOLD}File:{RESET} {}", image.path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    for field in image.fields() {
        println!("  {BOLD}{}{RESET}", field.label);
        println!("  {DIM}{}{RESET}", "─".repeat(70));
        for (name, value) in &field.values {
            if value.is_empty() {
                print_row(name, &format!("{DIM}—{RESET}"));
            } else {
                print_row(name, value);
            }
        }
        println!();
    }
}

/// Print every tag as read from the file.
fn print_raw(image: &LoadedImage) {
    println!();
    println!("{BOLD}File:{RESET} {}", image.path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    if image.snapshot.is_empty() {
        println!("  {DIM}(no EXIF metadata found){RESET}");
        println!();
        return;
    }

    for (key, value) in image.snapshot.tags() {
        print_row(key, value);
    }
    println!();
}

/// Print a single row in the EXIF display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
