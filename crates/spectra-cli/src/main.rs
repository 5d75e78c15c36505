//! spectra-render - run one source through the spectrogram pipeline
//!
//! Paints into a summary surface that records per-pass statistics instead of
//! pixels, which makes it handy for checking decode and supersession
//! behavior from a shell.
//!
//! ```text
//! spectra-render song.flac --window-size 1024 --regenerate-window-size 256
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use spectra_core::config::{default_config_path, load_config, save_config, PipelineConfig, CONFIG_FILENAME};
use spectra_core::{
    AudioInformation, CanvasScale, CanvasSize, Generation, PaintSurface, SpectrogramOptions, SpectrogramPipeline,
    WindowFunction,
};

#[derive(Parser)]
#[command(name = "spectra-render")]
#[command(about = "Decode an audio file or URL and stream it through the spectrogram pipeline")]
struct Cli {
    /// File path, file:// URL, or http(s):// URL
    source: String,

    /// FFT window size in samples
    #[arg(long)]
    window_size: Option<usize>,

    /// Window overlap in samples
    #[arg(long)]
    window_overlap: Option<usize>,

    /// Window function (hann, hamming, blackman, bartlett, welch, rectangular)
    #[arg(long)]
    window_function: Option<WindowFunction>,

    #[arg(long)]
    mel: bool,

    #[arg(long)]
    brightness: Option<f64>,

    #[arg(long)]
    contrast: Option<f64>,

    #[arg(long)]
    color_map: Option<String>,

    /// Canvas size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    size: Option<CanvasSize>,

    /// Re-render the cached bytes with this window size once the first pass starts
    #[arg(long)]
    regenerate_window_size: Option<usize>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective config back to the config file
    #[arg(long)]
    save_config: bool,
}

fn parse_size(s: &str) -> std::result::Result<CanvasSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", s))?;
    let width = w.trim().parse().map_err(|_| format!("bad width: {}", w))?;
    let height = h.trim().parse().map_err(|_| format!("bad height: {}", h))?;
    Ok(CanvasSize::new(width, height))
}

#[derive(Debug, Clone, Default)]
struct PassSummary {
    generation: Generation,
    window_size: usize,
    expected: u64,
    samples: u64,
    peak: f32,
    sum_squares: f64,
    finished: bool,
}

impl PassSummary {
    fn rms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            (self.sum_squares / self.samples as f64).sqrt()
        }
    }
}

/// Paint surface that only accumulates statistics
struct SummarySurface {
    passes: Arc<Mutex<Vec<PassSummary>>>,
}

impl SummarySurface {
    fn with_current(&self, generation: Generation, f: impl FnOnce(&mut PassSummary)) {
        let mut passes = self.passes.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pass) = passes.iter_mut().rev().find(|p| p.generation == generation) {
            f(pass);
        }
    }
}

impl PaintSurface for SummarySurface {
    fn begin(&mut self, generation: Generation, options: &SpectrogramOptions, audio: &AudioInformation) {
        log::info!(
            "Pass {} begins: window {} ({}), samples {}..{} @ {} Hz",
            generation,
            options.window_size,
            options.window_function,
            audio.start_sample,
            audio.end_sample,
            audio.sample_rate
        );
        self.passes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(PassSummary {
                generation,
                window_size: options.window_size,
                expected: audio.end_sample - audio.start_sample,
                ..Default::default()
            });
    }

    fn paint(&mut self, generation: Generation, samples: &[f32]) {
        self.with_current(generation, |pass| {
            pass.samples += samples.len() as u64;
            for &s in samples {
                pass.peak = pass.peak.max(s.abs());
                pass.sum_squares += (s as f64) * (s as f64);
            }
        });
    }

    fn finish(&mut self, generation: Generation) {
        self.with_current(generation, |pass| pass.finished = true);
        log::info!("Pass {} finished", generation);
    }

    fn resize(&mut self, size: CanvasSize, scale: CanvasScale) {
        log::info!("Canvas {}x{} ({:?})", size.width, size.height, scale);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(CONFIG_FILENAME));
    let config: PipelineConfig = load_config::<PipelineConfig>(&config_path).validate();

    let mut options = config.default_options.clone();
    if let Some(v) = cli.window_size {
        options.window_size = v;
    }
    if let Some(v) = cli.window_overlap {
        options.window_overlap = v;
    }
    if let Some(v) = cli.window_function {
        options.window_function = v;
    }
    if let Some(v) = cli.brightness {
        options.brightness = v;
    }
    if let Some(v) = cli.contrast {
        options.contrast = v;
    }
    if let Some(v) = cli.color_map.clone() {
        options.color_map = v;
    }
    options.mel_scale |= cli.mel;

    if cli.save_config {
        let mut saved = config.clone();
        saved.default_options = options.clone();
        save_config(&saved, &config_path)?;
    }

    let pipeline = SpectrogramPipeline::new(config).context("Failed to start pipeline")?;
    let passes = Arc::new(Mutex::new(Vec::new()));
    let surface = SummarySurface {
        passes: Arc::clone(&passes),
    };

    let started = Instant::now();
    let metadata = pipeline
        .connect(&cli.source, Box::new(surface), options.clone())
        .await
        .with_context(|| format!("Failed to render {}", cli.source))?;
    println!(
        "{}: {:.2}s, {} Hz, {} ch",
        cli.source, metadata.duration, metadata.sample_rate, metadata.channel_count
    );

    if let Some(size) = cli.size {
        pipeline.resize_canvas(size)?;
    }

    if let Some(window_size) = cli.regenerate_window_size {
        let regenerated = SpectrogramOptions {
            window_size,
            ..options
        };
        pipeline.regenerate_spectrogram(regenerated).await?;
    }

    let last = pipeline.generation();
    if !pipeline.wait_until_rendered(last).await? {
        log::warn!("Generation {} was superseded before it finished", last);
    }
    pipeline.shutdown();

    let passes = passes.lock().unwrap_or_else(|p| p.into_inner()).clone();
    for pass in &passes {
        println!(
            "{}  window {:>5}  {:>9}/{:<9} samples  peak {:.3}  rms {:.3}  {}",
            pass.generation,
            pass.window_size,
            pass.samples,
            pass.expected,
            pass.peak,
            pass.rms(),
            if pass.finished { "finished" } else { "superseded" }
        );
    }
    println!("Done in {:.2?}", started.elapsed());

    Ok(())
}
