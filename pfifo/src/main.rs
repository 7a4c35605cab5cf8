// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;
mod pushbuffer;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use pfifo_common::settings::{GpuMode, Settings};
use pfifo_gpu::backend::null_backend::NullBackend;
use pfifo_gpu::command_processor::MAX_ENTRY_WORDS;
use pfifo_gpu::engines::EngineClass;
use pfifo_gpu::memory::SparseMemory;
use pfifo_gpu::regs::BufferMethod;
use pfifo_gpu::syncpoint::NUM_SYNCPOINTS;
use pfifo_gpu::{GpEntry, Gpu, GpuShell, MethodCall};

/// GPU virtual address the pushbuffer is loaded at.
const PUSHBUFFER_VA: u64 = 0x1000_0000;

/// pfifo - GPU command stream replay
#[derive(Parser, Debug)]
#[command(name = "pfifo", version, about = "Replay a GPU pushbuffer through the command front-end")]
struct Args {
    /// Pushbuffer capture (little-endian 32-bit words)
    #[arg(short, long)]
    pushbuffer: PathBuf,

    /// Execution mode (default: from config, else async)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Path to config file (default: auto-detect)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Syncpoint to report after the run (repeatable)
    #[arg(short, long = "syncpoint")]
    syncpoints: Vec<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Sync,
    Async,
}

impl From<ModeArg> for GpuMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sync => GpuMode::Sync,
            ModeArg::Async => GpuMode::Async,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read first so it can raise the log level.
    let config_path = args.config.clone().or_else(config::find_config_path);
    let mut settings = match &config_path {
        Some(path) => config::settings_from_ini(&config::read_config(path)?),
        None => Settings::default(),
    };
    if let Some(mode) = args.mode {
        settings.gpu_mode = mode.into();
    }

    // Initialize logging
    let log_level = if args.verbose || settings.use_debug_logging {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("pfifo - GPU command stream replay");
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("No config found, using defaults"),
    }
    info!("Settings: {:?}", settings);

    let words = pushbuffer::load(&args.pushbuffer)?;
    info!(
        "Loaded {} words from {}",
        words.len(),
        args.pushbuffer.display()
    );
    let length = u32::try_from(words.len())
        .ok()
        .filter(|&len| len <= MAX_ENTRY_WORDS)
        .with_context(|| format!("Pushbuffer too large: {} words", words.len()))?;

    let memory = Arc::new(SparseMemory::new());
    memory.write_words(PUSHBUFFER_VA, &words);

    let mut gpu = Gpu::new(
        &settings,
        memory.clone(),
        Box::new(NullBackend::new()),
        Arc::new(|id: u32, value: u32| info!("Syncpoint interrupt: id={} value={}", id, value)),
    );
    gpu.context().register_default_engines();
    gpu.start().context("Failed to start GPU")?;

    for (subchannel, class) in EngineClass::KNOWN.iter().enumerate() {
        info!("Binding {} to subchannel {}", class, subchannel);
        gpu.call_method(MethodCall::new(
            BufferMethod::BindObject as u32,
            class.0,
            subchannel as u32,
            1,
        ));
    }

    gpu.push_entries(vec![GpEntry::new(PUSHBUFFER_VA, length)]);
    gpu.wait_idle().context("GPU did not finish the pushbuffer")?;
    info!(
        "Pushbuffer done ({} guest pages touched)",
        memory.resident_pages()
    );

    for id in args.syncpoints {
        if id as usize >= NUM_SYNCPOINTS {
            warn!("Syncpoint {} out of range (max {})", id, NUM_SYNCPOINTS - 1);
            continue;
        }
        info!("Syncpoint {}: {}", id, gpu.get_syncpoint_value(id));
    }

    Ok(())
}
