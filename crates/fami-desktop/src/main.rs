//! Fami Desktop - windowed frontend
//!
//! A minifb window presents the front buffer, keyboard state is packed into
//! the controller 1 button vector every frame, and rodio plays the sample
//! stream. Emulation is paced by wall-clock time: each loop iteration runs
//! the device for the seconds that passed since the previous one.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{self, Receiver};
use fami_core::controller::BUTTON_COUNT;
use fami_core::{AudioConfig, Device, HEIGHT, WIDTH};
use minifb::{Key, KeyRepeat, Scale, Window, WindowOptions};
use rodio::{OutputStream, Source};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Longest stretch emulated in one iteration, so a stalled window does not
/// make the game race to catch up
const MAX_STEP: Duration = Duration::from_millis(50);

/// Fami Desktop
#[derive(Parser, Debug)]
#[command(name = "fami-desktop")]
#[command(about = "A NES emulator desktop app", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Window scale factor (1, 2, 4 or 8)
    #[arg(short, long, default_value_t = 2)]
    scale: usize,

    /// Audio sample rate in Hz; 0 disables sound
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Save-state file for F5/F9 (defaults to the ROM path with a .state extension)
    #[arg(long)]
    state: Option<PathBuf>,
}

/// Keyboard layout in controller button order: A, B, Select, Start, Up,
/// Down, Left, Right
const KEYMAP: [Key; BUTTON_COUNT] = [
    Key::Z,
    Key::X,
    Key::RightShift,
    Key::Enter,
    Key::Up,
    Key::Down,
    Key::Left,
    Key::Right,
];

/// rodio source pulling mono samples from the emulator; underruns play silence
struct SampleStream {
    receiver: Receiver<f32>,
    sample_rate: u32,
}

impl Iterator for SampleStream {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(self.receiver.try_recv().unwrap_or(0.0))
    }
}

impl Source for SampleStream {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

fn scale(factor: usize) -> Scale {
    match factor {
        1 => Scale::X1,
        4 => Scale::X4,
        8 => Scale::X8,
        _ => Scale::X2,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let state_path = args.state.clone().unwrap_or_else(|| args.rom.with_extension("state"));

    let mut device =
        Device::open(&args.rom).with_context(|| format!("failed to load {}", args.rom.display()))?;

    // The stream must outlive the loop or playback stops
    let _stream = if args.sample_rate > 0 {
        match OutputStream::try_default() {
            Ok((stream, handle)) => {
                let (sender, receiver) = channel::bounded(args.sample_rate as usize / 10);
                device.set_audio(AudioConfig::new(args.sample_rate as f64), sender);
                handle
                    .play_raw(SampleStream { receiver, sample_rate: args.sample_rate })
                    .context("failed to start audio playback")?;
                Some(stream)
            }
            Err(err) => {
                warn!(%err, "no audio output device, running silent");
                None
            }
        }
    } else {
        None
    };

    let title = format!("Fami - {}", args.rom.display());
    let mut window = Window::new(
        &title,
        WIDTH,
        HEIGHT,
        WindowOptions {
            resize: false,
            scale: scale(args.scale),
            ..WindowOptions::default()
        },
    )
    .context("failed to create window")?;
    window.set_target_fps(60);

    info!("Z/X = A/B, Right Shift = Select, Enter = Start, arrows = D-pad");
    info!("R = reset, F5 = save state, F9 = load state, Esc = quit");

    let mut last = Instant::now();
    while window.is_open() && !window.is_key_down(Key::Escape) {
        let buttons = KEYMAP.map(|key| window.is_key_down(key));
        device.set_buttons1(buttons);

        if window.is_key_pressed(Key::R, KeyRepeat::No) {
            device.reset()?;
        }
        if window.is_key_pressed(Key::F5, KeyRepeat::No) {
            if let Err(err) = device.save_state(&state_path) {
                error!(%err, "save failed");
            }
        }
        if window.is_key_pressed(Key::F9, KeyRepeat::No) {
            if let Err(err) = device.load_state(&state_path) {
                error!(%err, "load failed");
            }
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last).min(MAX_STEP);
        last = now;
        if let Err(err) = device.step_seconds(elapsed.as_secs_f64()) {
            warn!(%err, "emulation fault");
        }

        window
            .update_with_buffer(device.buffer(), WIDTH, HEIGHT)
            .context("failed to present frame")?;
    }

    info!("emulator closed");
    Ok(())
}
