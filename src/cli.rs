// ============================================================================
// staxie CLI — inspect, create, export and re-save sprite stack files
// ============================================================================
//
// Usage examples:
//   staxie info sprites/*.png --json
//   staxie new body.png --frame-width 16 --frame-height 16 --stack body --animation idle --frames 2
//   staxie export body.png -o idle.png --stack body --animation idle
//   staxie resave *.png --output-dir cleaned/
//   staxie verify a.png b.png
//
// Everything runs synchronously on the current thread.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EditorSettings;
use crate::error::DocumentResult;
use crate::io::{self, CodecOptions};
use crate::ops::canvas_ops::{AddStack, ChangeFrameTime, InsertFrame, RenameAnimation};
use crate::project::SpriteDocument;
use crate::stax::{Area, StaxStack};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Sprite stack editor, headless.
#[derive(Parser, Debug)]
#[command(name = "staxie", version, about = "Inspect and convert sprite stack PNG files")]
pub struct CliArgs {
    /// Mirror log output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print size, palette and stack tree of each file.
    Info {
        /// Input file(s). Glob patterns accepted.
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        /// Emit one JSON document per file.
        #[arg(long)]
        json: bool,
    },
    /// Create a new file holding one stack.
    New(NewArgs),
    /// Flatten a file, or one stack / animation / frame of it, to plain RGBA PNG.
    Export {
        input: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        #[arg(long)]
        stack: Option<String>,
        #[arg(long, requires = "stack")]
        animation: Option<String>,
        #[arg(long, requires = "animation")]
        frame: Option<usize>,
    },
    /// Decode and re-encode files.
    Resave {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        /// Write here instead of overwriting the inputs.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Check that files decode, have a consistent layout and survive a
    /// re-encode unchanged.
    Verify {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct NewArgs {
    pub output: PathBuf,
    #[arg(long)]
    pub frame_width: Option<u32>,
    #[arg(long)]
    pub frame_height: Option<u32>,
    #[arg(long, default_value = "stack 1")]
    pub stack: String,
    #[arg(long, default_value = "animation")]
    pub animation: String,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub frames: u16,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub slices: u16,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one subcommand and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs, settings: &EditorSettings) -> ExitCode {
    let options = CodecOptions::from_settings(settings);
    let result = match args.command {
        CliCommand::Info { inputs, json } => for_each_input(&inputs, args.verbose, |path| info(path, json, &options)),
        CliCommand::New(new) => new_file(&new, settings, &options),
        CliCommand::Export {
            input,
            output,
            stack,
            animation,
            frame,
        } => export(&input, &output, stack.as_deref(), animation.as_deref(), frame, &options),
        CliCommand::Resave { inputs, output_dir } => {
            if let Some(dir) = &output_dir
                && let Err(e) = std::fs::create_dir_all(dir)
            {
                eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
                return ExitCode::FAILURE;
            }
            for_each_input(&inputs, args.verbose, |path| resave(path, output_dir.as_deref(), &options))
        }
        CliCommand::Verify { inputs } => for_each_input(&inputs, args.verbose, |path| verify(path, &options)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run `job` on every resolved input, reporting failures and carrying on.
fn for_each_input(
    patterns: &[String],
    verbose: bool,
    mut job: impl FnMut(&Path) -> Result<(), String>,
) -> Result<(), String> {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        return Err("no input files matched the given pattern(s).".into());
    }
    let total = inputs.len();
    let mut failures = 0;
    for (idx, input) in inputs.iter().enumerate() {
        let start = Instant::now();
        if verbose && total > 1 {
            println!("[{}/{}] {}", idx + 1, total, input.display());
        }
        if let Err(e) = job(input) {
            eprintln!("  {}: {}", input.display(), e);
            failures += 1;
        }
        debug!(input = %input.display(), ms = start.elapsed().as_millis() as u64, "processed");
    }
    if failures == 0 {
        Ok(())
    } else {
        Err(format!("{failures} of {total} file(s) failed"))
    }
}

// ============================================================================
// Subcommands
// ============================================================================

#[derive(Serialize)]
struct FileInfo<'a> {
    path: String,
    width: u32,
    height: u32,
    palette_len: usize,
    frame_width: u32,
    frame_height: u32,
    stacks: &'a [StaxStack],
    text: &'a BTreeMap<String, String>,
    ancillary: Vec<String>,
}

fn info(path: &Path, json: bool, options: &CodecOptions) -> Result<(), String> {
    let doc = io::load_document(path, options).map_err(|e| format!("load failed: {e}"))?;
    let state = &doc.state;
    let info = FileInfo {
        path: path.display().to_string(),
        width: state.width(),
        height: state.height(),
        palette_len: state.canvas.palette.len(),
        frame_width: state.sheet.frame_width,
        frame_height: state.sheet.frame_height,
        stacks: &state.sheet.stacks,
        text: &state.text,
        ancillary: state.ancillary.iter().map(|c| c.kind_str()).collect(),
    };
    if json {
        let out = serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?;
        println!("{out}");
        return Ok(());
    }
    println!(
        "{}: {}x{}, {} colors, frames {}x{}",
        info.path, info.width, info.height, info.palette_len, info.frame_width, info.frame_height
    );
    for stack in info.stacks {
        println!("  {} ({} slices)", stack.name, stack.slice_count);
        for animation in &stack.animations {
            println!(
                "    {}: {} frame(s) @ {}ms",
                animation.name,
                animation.frames.len(),
                animation.frame_time
            );
        }
    }
    Ok(())
}

/// Build a document with one stack through the command layer, as an
/// editor would.
pub fn build_new_document(new: &NewArgs, settings: &EditorSettings) -> Result<SpriteDocument, String> {
    let fw = new.frame_width.unwrap_or(settings.default_frame_width);
    let fh = new.frame_height.unwrap_or(settings.default_frame_height);
    let mut doc = SpriteDocument::new_untitled(1, fw, fh);
    doc.history.set_max_steps(settings.max_undo_steps);

    doc.capture();
    let built = push_new_stack(&mut doc, new, settings);
    doc.release("New stack");
    built.map_err(|e| e.to_string())?;
    Ok(doc)
}

fn push_new_stack(doc: &mut SpriteDocument, new: &NewArgs, settings: &EditorSettings) -> DocumentResult<()> {
    doc.push(Box::new(AddStack::new(new.slices as usize).named(new.stack.clone())))?;
    if new.animation != "animation" {
        doc.push(Box::new(RenameAnimation::new(&new.stack, "animation", &new.animation)))?;
    }
    for _ in 1..new.frames {
        doc.push(Box::new(InsertFrame::append(&new.stack, &new.animation)))?;
    }
    doc.push(Box::new(ChangeFrameTime::new(
        &new.stack,
        &new.animation,
        settings.default_frame_time,
    )))
}

fn new_file(new: &NewArgs, settings: &EditorSettings, options: &CodecOptions) -> Result<(), String> {
    let mut doc = build_new_document(new, settings)?;
    io::save_document(&mut doc, &new.output, options).map_err(|e| format!("save failed: {e}"))?;
    println!(
        "{}: {}x{} canvas, stack '{}'",
        new.output.display(),
        doc.state.width(),
        doc.state.height(),
        new.stack
    );
    Ok(())
}

fn export(
    input: &Path,
    output: &Path,
    stack: Option<&str>,
    animation: Option<&str>,
    frame: Option<usize>,
    options: &CodecOptions,
) -> Result<(), String> {
    let doc = io::load_document(input, options).map_err(|e| format!("load failed: {e}"))?;
    let area = export_area(&doc, stack, animation, frame).map_err(|e| e.to_string())?;
    let image = doc.state.canvas.region_to_rgba(area.x, area.y, area.width, area.height);
    image
        .save_with_format(output, image::ImageFormat::Png)
        .map_err(|e| format!("save failed: {e}"))?;
    Ok(())
}

/// Area named by the export flags; the whole sheet when none are given.
pub fn export_area(
    doc: &SpriteDocument,
    stack: Option<&str>,
    animation: Option<&str>,
    frame: Option<usize>,
) -> DocumentResult<Area> {
    match (stack, animation, frame) {
        (Some(s), Some(a), Some(f)) => doc.frame_area(s, a, f),
        (Some(s), Some(a), None) => doc.animation_area(s, a),
        (Some(s), None, _) => doc.stack_area(s),
        _ => Ok(doc.state.sheet_area()),
    }
}

fn resave(path: &Path, output_dir: Option<&Path>, options: &CodecOptions) -> Result<(), String> {
    let mut doc = io::load_document(path, options).map_err(|e| format!("load failed: {e}"))?;
    let target = match output_dir {
        Some(dir) => dir.join(path.file_name().ok_or("input has no file name")?),
        None => path.to_path_buf(),
    };
    io::save_document(&mut doc, &target, options).map_err(|e| format!("save failed: {e}"))
}

fn verify(path: &Path, options: &CodecOptions) -> Result<(), String> {
    let doc = io::load_document(path, options).map_err(|e| format!("load failed: {e}"))?;
    if !doc.state.layout_is_consistent() {
        return Err("stack layout does not match the canvas".into());
    }
    let bytes = doc.encode(options).map_err(|e| format!("re-encode failed: {e}"))?;
    let again = io::decode(&bytes, options).map_err(|e| format!("re-decode failed: {e}"))?;
    if again != doc.state {
        return Err("document changed across a save".into());
    }
    println!("{}: OK", path.display());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    warn!(pattern = %pattern, "pattern matched no files");
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_args(output: PathBuf) -> NewArgs {
        NewArgs {
            output,
            frame_width: Some(16),
            frame_height: Some(16),
            stack: "body".into(),
            animation: "idle".into(),
            frames: 2,
            slices: 1,
        }
    }

    #[test]
    fn new_document_is_one_undo_step() {
        let mut doc = build_new_document(&new_args(PathBuf::from("x.png")), &EditorSettings::default()).unwrap();
        assert_eq!((doc.state.width(), doc.state.height()), (16, 32));
        assert_eq!(doc.frame_area("body", "idle", 1).unwrap(), Area::new(0, 16, 16, 16));
        assert_eq!(doc.history.undo_count(), 1);
        doc.undo().unwrap();
        assert!(doc.state.sheet.stacks.is_empty());
    }

    #[test]
    fn export_area_follows_flags() {
        let doc = build_new_document(&new_args(PathBuf::from("x.png")), &EditorSettings::default()).unwrap();
        assert_eq!(export_area(&doc, None, None, None).unwrap(), Area::new(0, 0, 16, 32));
        assert_eq!(export_area(&doc, Some("body"), Some("idle"), Some(0)).unwrap(), Area::new(0, 0, 16, 16));
        assert!(export_area(&doc, Some("legs"), None, None).is_err());
    }

    #[test]
    fn parses_subcommands() {
        let args = CliArgs::try_parse_from(["staxie", "-v", "export", "a.png", "-o", "b.png", "--stack", "s"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, CliCommand::Export { stack: Some(_), animation: None, .. }));
        assert!(CliArgs::try_parse_from(["staxie", "export", "a.png", "-o", "b.png", "--frame", "1"]).is_err());
    }

    #[test]
    fn new_then_verify_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.png");
        let options = CodecOptions::default();
        new_file(&new_args(path.clone()), &EditorSettings::default(), &options).unwrap();
        verify(&path, &options).unwrap();
    }
}
