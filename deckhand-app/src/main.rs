//! deckhand - automatic DJ engine
//!
//! Wires the mixer to a cpal output stream and exposes the operator
//! commands on a small stdin console. The data directory holds the song
//! catalog (`songs/`), transition presets (`transitions/`) and the fixed
//! effect assets (`fx/noise.wav`, `fx/reverb.wav`).

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use deckhand_audio::{Mixer, TransitionDef, BUFFER_SIZE, SAMPLE_RATE};
use deckhand_library::{
    load_effect_assets, song_list, transition_list, AnalysisCache, LibraryScanner, SongLoader,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let scan = args.iter().any(|a| a == "--scan");
    let data_dir = PathBuf::from(
        args.iter()
            .find(|a| !a.starts_with("--"))
            .cloned()
            .unwrap_or_else(|| "data".into()),
    );

    info!(data = %data_dir.display(), "initialising mixer");
    let assets = load_effect_assets(&data_dir.join("fx"))
        .context("loading effect assets (data/fx/noise.wav, data/fx/reverb.wav)")?;
    let mixer = Arc::new(Mixer::new(&assets));

    let cache_path = data_dir.join("analysis.db");
    if scan {
        // Pre-analyse the catalog so console loads hit the cache.
        let (progress, _handle) = LibraryScanner::new(cache_path.clone())
            .scan_async(&data_dir.join("songs"));
        std::thread::spawn(move || for _ in progress {});
    }

    let _stream = start_output_stream(mixer.clone())?;
    info!("audio stream running");

    console(&mixer, &data_dir, &cache_path)
}

/// Open the 48 kHz stereo output stream. The device pulls arbitrary
/// callback sizes; an adapter carves them out of fixed mixer blocks.
fn start_output_stream(mixer: Arc<Mixer>) -> anyhow::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no audio output device"))?;

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut adapter = BlockAdapter::new(mixer);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                adapter.fill(data);
            },
            |err| {
                // The sink substitutes silence on its own; just log.
                error!(error = %err, "audio stream error");
            },
            None,
        )
        .context("building output stream")?;
    stream.play().context("starting output stream")?;
    Ok(stream)
}

/// Carves arbitrary sink callback sizes out of fixed `BUFFER_SIZE` blocks
/// pulled from the mixer.
struct BlockAdapter {
    mixer: Arc<Mixer>,
    block: Vec<f32>,
    offset: usize,
}

impl BlockAdapter {
    fn new(mixer: Arc<Mixer>) -> BlockAdapter {
        BlockAdapter {
            mixer,
            block: vec![0.0; BUFFER_SIZE * 2],
            offset: BUFFER_SIZE * 2,
        }
    }

    fn fill(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.offset >= self.block.len() {
                self.mixer.produce(&mut self.block);
                self.offset = 0;
            }
            let n = (out.len() - written).min(self.block.len() - self.offset);
            out[written..written + n]
                .copy_from_slice(&self.block[self.offset..self.offset + n]);
            self.offset += n;
            written += n;
        }
    }
}

const HELP: &str = "\
commands:
  status                                  mixer state as JSON
  bpm <60-200>                            set the global tempo
  load <file>                             load a song into the suitable deck
  queue <a.json> <b.json> <a0> <a1> <b0> <b1>
                                          queue a transition (bar selections)
  cancel                                  cancel the queued transition
  songs                                   list the song catalog
  transitions                             list transition presets
  quit";

/// The stdin binding of the command surface.
fn console(mixer: &Mixer, data_dir: &Path, cache_path: &Path) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    println!("{}", HELP);

    for line in stdin.lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        let result = match parts.as_slice() {
            [] => Ok(()),
            ["quit"] | ["exit"] => break,
            ["help"] => {
                println!("{}", HELP);
                Ok(())
            }
            ["status"] => serde_json::to_string_pretty(&mixer.status())
                .map(|s| println!("{}", s))
                .map_err(|e| anyhow!(e)),
            ["bpm", value] => value
                .parse::<i32>()
                .map_err(|e| anyhow!(e))
                .and_then(|bpm| mixer.set_global_bpm(bpm).map_err(|e| anyhow!(e))),
            ["load", file] => load_command(mixer, cache_path, Path::new(file)),
            ["queue", a_file, b_file, sel @ ..] if sel.len() == 4 => {
                queue_command(mixer, a_file, b_file, sel)
            }
            ["cancel"] => mixer
                .cancel()
                .map(|target| println!("cancelled, reset {:?}", target))
                .map_err(|e| anyhow!(e)),
            ["songs"] => {
                for song in song_list(&data_dir.join("songs")) {
                    println!("{}\t{} - {}", song.file.display(), song.artist, song.title);
                }
                Ok(())
            }
            ["transitions"] => {
                for preset in transition_list(&data_dir.join("transitions")) {
                    println!("{}\t{}", preset.file.display(), preset.name);
                }
                Ok(())
            }
            _ => Err(anyhow!("unrecognised command, try `help`")),
        };
        if let Err(e) = result {
            println!("error: {}", e);
        }
    }
    Ok(())
}

/// Decode and analyse outside the mixer lock, then install the result.
fn load_command(mixer: &Mixer, cache_path: &Path, file: &Path) -> anyhow::Result<()> {
    let song = match mixer.find_loaded(file) {
        Some(song) => song,
        None => {
            let loader = match AnalysisCache::open(cache_path) {
                Ok(cache) => SongLoader::with_cache(cache),
                Err(_) => SongLoader::new(),
            };
            Arc::new(loader.load(file)?)
        }
    };
    let target = mixer.install(song)?;
    println!("loaded into {:?}", target);
    Ok(())
}

fn queue_command(mixer: &Mixer, a_file: &str, b_file: &str, sel: &[&str]) -> anyhow::Result<()> {
    let a_trans = read_transition(Path::new(a_file))?;
    let b_trans = read_transition(Path::new(b_file))?;
    let bars: Vec<i64> = sel
        .iter()
        .map(|s| s.parse::<i64>())
        .collect::<Result<_, _>>()?;
    let direction = mixer.queue(
        &a_trans,
        &b_trans,
        [bars[0], bars[1]],
        [bars[2], bars[3]],
    )?;
    println!("queued {:?}", direction);
    Ok(())
}

/// A transition file is either a preset (`{ name, effects }`) or a bare
/// effect map.
fn read_transition(file: &Path) -> anyhow::Result<TransitionDef> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let effects = value.get("effects").unwrap_or(&value);
    Ok(serde_json::from_value(effects.clone())?)
}
