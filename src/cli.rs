// ============================================================================
// InpaintFE CLI: headless mask conversion via command-line arguments
// ============================================================================
//
// Usage examples:
//   inpaintfe compress -i brush_export.png --target 1216x832 -o mask.png
//   inpaintfe display  -i mask.png --target 1216x832 -o preview.png --overlay
//   inpaintfe realign  -i mask.imr --image 1920x1080 --to 10,-5,0,1 -o moved.imr
//   inpaintfe invert   -i masks/*.png --output-dir inverted/
//   inpaintfe pack     -i mask.png --target 1216x832 --bias 2 -o mask.imr
//   inpaintfe config   --set overlay_alpha=0.5
//
// Everything runs synchronously on the current thread; the codec itself
// still fans rows out over rayon.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use crate::error::MaskError;
use crate::io::{
    CompressedMask, MaskRecord, load_image_file, load_mask_record, save_mask_record,
    write_png_file,
};
use crate::logger;
use crate::ops::codec::{
    encode_compressed, invert_mask, preview_overlay, upgrade_legacy_mask, upscale_for_display,
};
use crate::ops::transform::{BiasState, realign_mask};
use crate::settings::MaskSettings;
use crate::{log_err, log_info};

const RECORD_EXT: &str = "imr";

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// InpaintFE headless mask processor.
#[derive(Parser, Debug)]
#[command(
    name = "inpaintfe",
    about = "InpaintFE headless inpaint-mask processor",
    long_about = "Encode, preview, invert and realign inpaint masks without opening\n\
                  the editor. Compressed masks are PNGs at 1/8 of the target\n\
                  resolution holding only pure black and pure white; .imr records\n\
                  add the target size and the bias the mask was authored under.\n\n\
                  Example:\n  \
                  inpaintfe compress -i paint.png --target 1216x832 -o mask.png\n  \
                  inpaintfe realign -i mask.imr --image 1920x1080 --to 2 -o out.imr"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Print per-file timing information.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Encode any image into a compressed mask (non-black → painted).
    Compress {
        #[command(flatten)]
        io: BatchIo,
        /// Generation target resolution, e.g. 1216x832.
        #[arg(long, value_parser = parse_dims, value_name = "WxH")]
        target: Dims,
    },
    /// Upscale a compressed mask to the full-resolution display mask.
    Display {
        #[command(flatten)]
        io: BatchIo,
        /// Target resolution. Taken from the record for .imr input.
        #[arg(long, value_parser = parse_dims, value_name = "WxH")]
        target: Option<Dims>,
        /// Write the translucent green preview overlay instead.
        #[arg(long)]
        overlay: bool,
        /// Overlay opacity (0.0–1.0). Defaults to the saved `overlay_alpha`.
        #[arg(long, value_name = "0-1")]
        alpha: Option<f32>,
    },
    /// Re-register a mask after the source image placement changed.
    Realign {
        #[command(flatten)]
        io: BatchIo,
        /// Target resolution. Taken from the record for .imr input.
        #[arg(long, value_parser = parse_dims, value_name = "WxH")]
        target: Option<Dims>,
        /// Source image resolution.
        #[arg(long, value_parser = parse_dims, value_name = "WxH")]
        image: Dims,
        /// Bias the mask was authored under. Defaults to the record's bias.
        #[arg(long, value_parser = parse_bias, value_name = "BIAS", allow_hyphen_values = true)]
        from: Option<BiasState>,
        /// New bias: anchor 0–4 or x,y,rotate,scale.
        #[arg(long, value_parser = parse_bias, value_name = "BIAS", allow_hyphen_values = true)]
        to: BiasState,
    },
    /// Swap painted and unpainted.
    Invert {
        #[command(flatten)]
        io: BatchIo,
    },
    /// Bundle a compressed mask, its target size and bias into an .imr record.
    Pack {
        #[command(flatten)]
        io: BatchIo,
        #[arg(long, value_parser = parse_dims, value_name = "WxH")]
        target: Dims,
        #[arg(long, value_parser = parse_bias, value_name = "BIAS", allow_hyphen_values = true)]
        bias: Option<BiasState>,
    },
    /// Show the saved mask settings, or change them with --set.
    Config {
        /// e.g. --set overlay_alpha=0.5 --set brush_shape=square
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct BatchIo {
    /// Input file(s). Glob patterns accepted (e.g. "masks/*.png").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dims {
    pub w: u32,
    pub h: u32,
}

impl Command {
    fn io(&self) -> Option<&BatchIo> {
        match self {
            Command::Compress { io, .. }
            | Command::Display { io, .. }
            | Command::Realign { io, .. }
            | Command::Invert { io }
            | Command::Pack { io, .. } => Some(io),
            Command::Config { .. } => None,
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            Command::Pack { .. } => RECORD_EXT,
            _ => "png",
        }
    }
}

fn parse_dims(s: &str) -> Result<Dims, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("'{}' is not WxH", s))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("width: {}", e))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("height: {}", e))?;
    MaskError::check_dimensions(w, h).map_err(|e| e.to_string())?;
    Ok(Dims { w, h })
}

fn parse_bias(s: &str) -> Result<BiasState, String> {
    s.parse::<BiasState>().map_err(|e| e.to_string())
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs, settings: &mut MaskSettings) -> ExitCode {
    if args.verbose
        && let Some(path) = logger::log_path()
    {
        println!("log: {}", path.display());
    }

    if let Command::Config { set } = &args.command {
        return run_config(settings, set);
    }
    let Some(io) = args.command.io() else {
        return ExitCode::FAILURE;
    };
    let inputs = resolve_inputs(&io.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && io.output.is_some() && io.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &io.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            io.output.as_deref(),
            io.output_dir.as_deref(),
            args.command.default_extension(),
        ) else {
            eprintln!(
                "  error: cannot determine output path for '{}'.",
                input_path.display()
            );
            any_failure = true;
            continue;
        };

        match run_one(&args.command, input_path, &output_path, settings) {
            Ok(()) => {
                log_info!("{} -> {}", input_path.display(), output_path.display());
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log_err!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// ============================================================================
// Per-file processing
// ============================================================================

/// A compressed mask read from disk, with whatever a record carried.
struct LoadedMask {
    mask: CompressedMask,
    target: Option<Dims>,
    bias: Option<BiasState>,
}

fn run_one(
    command: &Command,
    input: &Path,
    output: &Path,
    settings: &MaskSettings,
) -> Result<(), MaskError> {
    match command {
        Command::Compress { target, .. } => {
            let source = load_image_file(input)?;
            let mask = encode_compressed(&source, target.w, target.h)?;
            write_png_file(mask.as_rgba(), output)
        }
        Command::Display {
            target,
            overlay,
            alpha,
            ..
        } => {
            let loaded = load_mask(input, *target)?;
            let t = require_target(&loaded, *target)?;
            let display = upscale_for_display(&loaded.mask, t.w, t.h)?;
            if *overlay {
                let alpha = alpha.unwrap_or(settings.overlay_alpha);
                write_png_file(&preview_overlay(&display, alpha), output)
            } else {
                write_png_file(display.as_rgba(), output)
            }
        }
        Command::Realign {
            target,
            image,
            from,
            to,
            ..
        } => {
            let loaded = load_mask(input, *target)?;
            let t = require_target(&loaded, *target)?;
            let from = from.or(loaded.bias);
            let realigned = realign_mask(&loaded.mask, from, *to, (image.w, image.h), (t.w, t.h))?;
            write_mask(realigned, output, Some(t), Some(*to))
        }
        Command::Invert { .. } => {
            let loaded = load_mask(input, None)?;
            write_mask(invert_mask(&loaded.mask), output, loaded.target, loaded.bias)
        }
        Command::Pack { target, bias, .. } => {
            let loaded = load_mask(input, Some(*target))?;
            let record = MaskRecord::new(target.w, target.h, loaded.mask, bias.or(loaded.bias))?;
            save_mask_record(&record, output)
        }
        Command::Config { .. } => Err(MaskError::UnsupportedMaskFormat(
            "config takes no input files".into(),
        )),
    }
}

/// Apply `KEY=VALUE` assignments, then persist and print the settings.
fn run_config(settings: &mut MaskSettings, assignments: &[String]) -> ExitCode {
    if let Err(e) = configure(settings, assignments) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    if !assignments.is_empty()
        && let Err(e) = settings.save()
    {
        log_err!("Could not save settings: {}", e);
        eprintln!("error: could not save settings: {}", e);
        return ExitCode::FAILURE;
    }
    if let Some(path) = MaskSettings::settings_path() {
        println!("# {}", path.display());
    }
    print!("{}", settings.to_config_string());
    ExitCode::SUCCESS
}

fn configure(settings: &mut MaskSettings, assignments: &[String]) -> Result<(), String> {
    let mut next = settings.clone();
    for assignment in assignments {
        let (key, val) = assignment
            .split_once('=')
            .ok_or_else(|| format!("'{}' is not KEY=VALUE", assignment))?;
        if !next.apply(key, val) {
            return Err(format!("unknown key or bad value in '{}'", assignment));
        }
    }
    *settings = next;
    Ok(())
}

fn is_record(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(RECORD_EXT))
}

/// Read a compressed mask, or an `.imr` record.
///
/// A PNG that is not a valid compressed mask for `target` (a full-resolution
/// or anti-aliased legacy mask) is upgraded when a target is known.
fn load_mask(path: &Path, target: Option<Dims>) -> Result<LoadedMask, MaskError> {
    if is_record(path) {
        let record = load_mask_record(path)?;
        return Ok(LoadedMask {
            mask: record.mask,
            target: Some(Dims {
                w: record.target_w,
                h: record.target_h,
            }),
            bias: record.bias,
        });
    }
    let direct = CompressedMask::from_binarized(load_image_file(path)?);
    let mask = match (direct, target) {
        (Ok(mask), Some(t)) if mask.fits_target(t.w, t.h) => mask,
        (Ok(mask), None) => mask,
        (direct, Some(t)) => {
            let bytes = std::fs::read(path)?;
            match upgrade_legacy_mask(&bytes, t.w, t.h) {
                Some(mask) => mask,
                None => direct?,
            }
        }
        (Err(e), None) => return Err(e),
    };
    Ok(LoadedMask {
        mask,
        target: None,
        bias: None,
    })
}

/// Pick the explicit target over the record's and check the mask fits it.
fn require_target(loaded: &LoadedMask, explicit: Option<Dims>) -> Result<Dims, MaskError> {
    let t = explicit.or(loaded.target).ok_or_else(|| {
        MaskError::UnsupportedMaskFormat("--target is required for PNG input".into())
    })?;
    if !loaded.mask.fits_target(t.w, t.h) {
        return Err(MaskError::UnsupportedMaskFormat(format!(
            "{}x{} mask is not the compressed size for {}x{}",
            loaded.mask.width(),
            loaded.mask.height(),
            t.w,
            t.h
        )));
    }
    Ok(t)
}

fn write_mask(
    mask: CompressedMask,
    output: &Path,
    target: Option<Dims>,
    bias: Option<BiasState>,
) -> Result<(), MaskError> {
    if !is_record(output) {
        return write_png_file(mask.as_rgba(), output);
    }
    let t = target.ok_or_else(|| {
        MaskError::UnsupportedMaskFormat("writing a record needs a target size".into())
    })?;
    save_mask_record(&MaskRecord::new(t.w, t.h, mask, bias)?, output)
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

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    ext: &str,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    // Avoid silent overwrite of the input
    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BLACK, WHITE};
    use crate::ops::transform::BiasTransform;
    use image::{Rgba, RgbaImage};

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("inpaintfe").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn dims_and_biases_parse() {
        assert_eq!(parse_dims("1216x832").unwrap(), Dims { w: 1216, h: 832 });
        assert!(parse_dims("0x832").is_err());
        assert!(parse_dims("1216").is_err());
        assert_eq!(parse_bias("4").unwrap(), BiasState::Anchor(4));
        assert!(parse_bias("5").is_err());
        assert_eq!(
            parse_bias("10,-5,0,1").unwrap(),
            BiasState::Transform(BiasTransform {
                x: 10.0,
                y: -5.0,
                rotate: 0.0,
                scale: 1.0
            })
        );
    }

    #[test]
    fn realign_accepts_negative_offsets() {
        let args = parse(&[
            "realign", "-i", "m.imr", "--image", "640x480", "--to", "-8,4,0,1", "-o", "out.imr",
        ]);
        match args.command {
            Command::Realign { to, from, .. } => {
                assert!(from.is_none());
                assert!(matches!(to, BiasState::Transform(t) if t.x == -8.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn output_paths_follow_priority() {
        let input = Path::new("masks/a.png");
        assert_eq!(
            build_output_path(input, Some(Path::new("x.png")), None, "png"),
            Some(PathBuf::from("x.png"))
        );
        assert_eq!(
            build_output_path(input, None, Some(Path::new("out")), RECORD_EXT),
            Some(PathBuf::from("out/a.imr"))
        );
        assert_eq!(
            build_output_path(input, None, None, "png"),
            Some(PathBuf::from("masks/a_out.png"))
        );
    }

    #[test]
    fn compress_pack_realign_on_disk() {
        let settings = MaskSettings::default();
        let dir = tempfile::tempdir().unwrap();
        let paint = dir.path().join("paint.png");
        let mut img = RgbaImage::from_pixel(64, 64, Rgba(BLACK));
        for y in 16..32 {
            for x in 16..32 {
                img.put_pixel(x, y, Rgba(WHITE));
            }
        }
        write_png_file(&img, &paint).unwrap();

        let compressed = dir.path().join("mask.png");
        let cmd = parse(&["compress", "-i", "x", "--target", "64x64"]).command;
        run_one(&cmd, &paint, &compressed, &settings).unwrap();
        let mask = load_mask(&compressed, None).unwrap().mask;
        assert_eq!(mask.dimensions(), (8, 8));
        assert_eq!(mask.painted_count(), 4);

        let record = dir.path().join("mask.imr");
        let cmd = parse(&["pack", "-i", "x", "--target", "64x64", "--bias", "0,0,0,1"]).command;
        run_one(&cmd, &compressed, &record, &settings).unwrap();

        let moved = dir.path().join("moved.imr");
        let cmd = parse(&["realign", "-i", "x", "--image", "64x64", "--to", "16,8,0,1"]).command;
        run_one(&cmd, &record, &moved, &settings).unwrap();
        let loaded = load_mask(&moved, None).unwrap();
        assert_eq!(loaded.mask.painted_count(), 4);
        assert!(loaded.mask.is_painted(4, 3) && loaded.mask.is_painted(5, 4));
        assert!(matches!(loaded.bias, Some(BiasState::Transform(t)) if t.x == 16.0));
    }

    #[test]
    fn display_needs_a_target_for_png_input() {
        let settings = MaskSettings::default();
        let dir = tempfile::tempdir().unwrap();
        let mask = dir.path().join("m.png");
        write_png_file(&RgbaImage::from_pixel(2, 2, Rgba(WHITE)), &mask).unwrap();
        let cmd = parse(&["display", "-i", "x"]).command;
        assert!(run_one(&cmd, &mask, &dir.path().join("d.png"), &settings).is_err());

        let cmd = parse(&["display", "-i", "x", "--target", "16x16", "--overlay"]).command;
        let out = dir.path().join("d.png");
        run_one(&cmd, &mask, &out, &settings).unwrap();
        let overlay = load_image_file(&out).unwrap();
        assert_eq!(overlay.dimensions(), (16, 16));
        assert_eq!(overlay.get_pixel(0, 0).0, [149, 254, 108, 199]);
    }

    #[test]
    fn overlay_alpha_defaults_to_saved_setting() {
        let dir = tempfile::tempdir().unwrap();
        let mask = dir.path().join("m.png");
        write_png_file(&RgbaImage::from_pixel(2, 2, Rgba(WHITE)), &mask).unwrap();
        let out = dir.path().join("d.png");

        let settings = MaskSettings {
            overlay_alpha: 0.0,
            ..MaskSettings::default()
        };
        let cmd = parse(&["display", "-i", "x", "--target", "16x16", "--overlay"]).command;
        run_one(&cmd, &mask, &out, &settings).unwrap();
        assert_eq!(load_image_file(&out).unwrap().get_pixel(0, 0).0[3], 0);

        let cmd = parse(&[
            "display", "-i", "x", "--target", "16x16", "--overlay", "--alpha", "1",
        ])
        .command;
        run_one(&cmd, &mask, &out, &settings).unwrap();
        assert_eq!(load_image_file(&out).unwrap().get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn config_assignments_apply_all_or_nothing() {
        let mut settings = MaskSettings::default();
        configure(
            &mut settings,
            &["overlay_alpha=0.5".to_string(), "tool=eraser".to_string()],
        )
        .unwrap();
        assert_eq!(settings.overlay_alpha, 0.5);

        let before = settings.clone();
        assert!(configure(&mut settings, &["brush_shape=square".to_string(), "alpha".to_string()]).is_err());
        assert!(configure(&mut settings, &["overlay_alpha=3".to_string()]).is_err());
        assert_eq!(settings, before);

        let args = parse(&["config", "--set", "brush_shape=square"]);
        assert!(args.command.io().is_none());
    }

    #[test]
    fn full_resolution_masks_are_upgraded_on_load() {
        let settings = MaskSettings::default();
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("legacy.png");
        let mut img = RgbaImage::from_pixel(64, 64, Rgba(BLACK));
        for y in 0..16 {
            for x in 0..64 {
                img.put_pixel(x, y, Rgba([200, 200, 200, 255]));
            }
        }
        write_png_file(&img, &legacy).unwrap();

        let record = dir.path().join("legacy.imr");
        let cmd = parse(&["pack", "-i", "x", "--target", "64x64"]).command;
        run_one(&cmd, &legacy, &record, &settings).unwrap();
        let loaded = load_mask(&record, None).unwrap();
        assert_eq!(loaded.mask.dimensions(), (8, 8));
        assert_eq!(loaded.mask.painted_count(), 16);

        let out = dir.path().join("display.png");
        let cmd = parse(&["display", "-i", "x", "--target", "64x64"]).command;
        run_one(&cmd, &legacy, &out, &settings).unwrap();
        let display = load_image_file(&out).unwrap();
        assert_eq!(display.dimensions(), (64, 64));
        assert_eq!(display.get_pixel(5, 10).0, WHITE);
        assert_eq!(display.get_pixel(5, 20).0, BLACK);

        let cmd = parse(&["invert", "-i", "x"]).command;
        assert!(run_one(&cmd, &legacy, &dir.path().join("inv.png"), &settings).is_err());
    }
}
