use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};
use palette::{FromColor, Hsv, Srgb};
use plotters::prelude::*;
use rayon::prelude::*;
use reaction_common::{load_report, read_frames, FieldFrame, SweepReport, UVec2};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Command-line arguments for the visualizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input frame file path (.bin) written by the engine recorder
    #[arg(short, long)]
    input: PathBuf,

    /// Optional sweep report (.json, .bin or .msgpack); adds start/end flags and the latency chart
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Directory the PNG frames are written to
    #[arg(short, long, default_value = "frames")]
    output_dir: PathBuf,

    /// Output pixels per grid cell
    #[arg(long, default_value_t = 2)]
    scale: u32,

    /// Cell channel mapped through the color ramp (0-3)
    #[arg(long, default_value_t = 0)]
    channel: usize,

    /// Render only every n-th frame
    #[arg(long, default_value_t = 1)]
    every: usize,

    /// Latency chart output path (needs --report)
    #[arg(long, default_value = "latency.png")]
    chart: PathBuf,
}

// Flag colors (RGBA)
const START_FLAG: [u8; 4] = [0, 255, 0, 255];
const END_FLAG: [u8; 4] = [255, 0, 255, 255];

/// Render settings shared by every frame.
#[derive(Debug, Clone, Copy)]
struct RenderSettings {
    scale: u32,
    channel: usize,
    markers: Option<(UVec2, UVec2)>,
}

/// Maps a value in [0, 1] to a blue (low) to red (high) ramp.
fn ramp_color(value: f32) -> [u8; 4] {
    let v = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
    let hsv = Hsv::new(240.0 * (1.0 - v), 1.0, 0.25 + 0.75 * v);
    let rgb = Srgb::from_color(hsv);
    [
        (rgb.red * 255.0).round() as u8,
        (rgb.green * 255.0).round() as u8,
        (rgb.blue * 255.0).round() as u8,
        255,
    ]
}

fn channel_value(cell: &reaction_common::Vec4, channel: usize) -> f32 {
    match channel {
        0 => cell.x,
        1 => cell.y,
        2 => cell.z,
        _ => cell.w,
    }
}

/// Draws one frame, each grid cell as a `scale` x `scale` block.
fn render_frame(frame: &FieldFrame, settings: &RenderSettings) -> RgbaImage {
    let scale = settings.scale.max(1);
    let mut image = RgbaImage::new(frame.width * scale, frame.height * scale);
    for (px, py, pixel) in image.enumerate_pixels_mut() {
        let value = frame
            .get(px / scale, py / scale)
            .map(|cell| channel_value(&cell, settings.channel))
            .unwrap_or(0.0);
        *pixel = Rgba(ramp_color(value));
    }

    if let Some((start, end)) = settings.markers {
        let radius = (2 * scale) as i32;
        draw_flag(&mut image, start, scale, radius, START_FLAG);
        draw_flag(&mut image, end, scale, radius, END_FLAG);
    }
    image
}

fn draw_flag(image: &mut RgbaImage, pos: UVec2, scale: u32, radius: i32, color: [u8; 4]) {
    let center = (
        (pos.x * scale + scale / 2) as i32,
        (pos.y * scale + scale / 2) as i32,
    );
    draw_filled_circle_mut(image, center, (radius / 2).max(1), Rgba(color));
    draw_hollow_circle_mut(image, center, radius + 1, Rgba([255, 255, 255, 255]));
}

/// Mean latency per distinct control value, in sweep order.
fn mean_latency(report: &SweepReport) -> Vec<(f32, f64)> {
    let mut means: Vec<(u32, f32, u64, u32)> = Vec::new();
    for m in report.measurements.iter().filter(|m| m.arrived) {
        match means.iter_mut().find(|(index, ..)| *index == m.sweep_index) {
            Some(entry) => {
                entry.2 += m.ticks;
                entry.3 += 1;
            }
            None => means.push((m.sweep_index, m.control_value, m.ticks, 1)),
        }
    }
    means.sort_by_key(|(index, ..)| *index);
    means
        .into_iter()
        .map(|(_, value, total, count)| (value, total as f64 / count as f64))
        .collect()
}

/// Latency (ticks) against control value: one dot per run, a line through the means.
fn draw_latency_chart(report: &SweepReport, path: &Path) -> Result<()> {
    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let arrived: Vec<(f32, f64)> = report
        .measurements
        .iter()
        .filter(|m| m.arrived)
        .map(|m| (m.control_value, m.ticks as f64))
        .collect();
    if arrived.is_empty() {
        root.draw(&Text::new(
            "No arrivals recorded",
            (500, 300),
            ("sans-serif", 20).into_font().color(&BLACK),
        ))?;
        root.present()?;
        return Ok(());
    }

    let (min_value, max_value) = arrived
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (v, _)| (lo.min(*v), hi.max(*v)));
    let max_ticks = arrived.iter().fold(0.0f64, |hi, (_, t)| hi.max(*t));
    // A single sweep point still needs a non-empty x range.
    let pad = ((max_value - min_value) * 0.1).max(0.005);

    let mut chart = ChartBuilder::on(&root)
        .caption("Propagation latency vs passive threshold", ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d((min_value - pad)..(max_value + pad), 0.0..max_ticks * 1.1 + 1.0)?;

    chart
        .configure_mesh()
        .x_desc("Passive threshold")
        .y_desc("Latency (ticks)")
        .draw()?;

    chart.draw_series(arrived.iter().map(|(v, t)| Circle::new((*v, *t), 3, BLUE.filled())))?;
    chart.draw_series(LineSeries::new(mean_latency(report), &RED))?;

    root.present()?;
    info!("Latency chart saved to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    // Initialize logger
    Builder::from_default_env()
        .filter(None, LevelFilter::Info)
        .init();

    info!("Starting Reaction Visualizer...");
    info!("Input file: {}", args.input.display());
    info!("Output directory: {}", args.output_dir.display());

    let report = match &args.report {
        Some(path) => {
            let report = load_report(path)?;
            info!(
                "Loaded report: {} measurements, completed: {}",
                report.measurements.len(),
                report.completed
            );
            Some(report)
        }
        None => None,
    };

    let settings = RenderSettings {
        scale: args.scale.max(1),
        channel: args.channel.min(3),
        markers: report.as_ref().map(|r| (r.start, r.end)),
    };

    // --- Render Frames ---
    let frames = read_frames(&args.input)?;
    if frames.is_empty() {
        warn!("Input file contains no frames.");
    } else {
        fs::create_dir_all(&args.output_dir)
            .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

        let selected: Vec<&FieldFrame> = frames.iter().step_by(args.every.max(1)).collect();
        let progress_bar = ProgressBar::new(selected.len() as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) [{eta}]")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );

        let start_time = Instant::now();
        let output_dir = args.output_dir.clone();
        let written: Result<Vec<()>> = selected
            .par_iter()
            .enumerate()
            .progress_with(progress_bar.clone())
            .map(|(i, frame)| {
                let image = render_frame(frame, &settings);
                let path = output_dir.join(format!("frame_{:05}.png", i));
                image
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))
            })
            .collect();
        written?;
        progress_bar.finish_with_message("done");

        let duration = start_time.elapsed();
        info!(
            "Rendered {} frames in {:.2?} ({:.1} frames per second)",
            selected.len(),
            duration,
            selected.len() as f64 / duration.as_secs_f64().max(1e-9)
        );
    }

    // --- Latency Chart ---
    match &report {
        Some(report) => draw_latency_chart(report, &args.chart)?,
        None => info!("No report given, skipping latency chart."),
    }

    Ok(())
}
