mod error;
mod export;
mod kaleido;
mod pipeline;
mod render_loop;
mod types;

use std::{
    io::{self, BufRead},
    path::PathBuf,
    str::FromStr,
    thread,
};

use anyhow::{Result, anyhow, bail};
use clap::Parser;

use export::Exporter;
use pipeline::{SourceProvider, StillImageProvider};
use render_loop::{
    FixedRateScheduler, LoopEvent, LoopOptions, RenderHandle, RenderLoop, StopReason,
};
use types::{ExportMode, ExportRequest, FacingMode, KaleidoConfig, Scale};

/// Mangankyo - live kaleidoscope with seamless repeat tiles
#[derive(Parser, Debug)]
#[command(name = "mangankyo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Render a still image instead of a camera feed
    #[arg(short, long, conflicts_with = "camera")]
    image: Option<PathBuf>,

    /// Use this camera index instead of choosing one by facing
    #[arg(short, long)]
    camera: Option<u32>,

    /// Print the cameras that can be opened and exit
    #[arg(long)]
    list_cameras: bool,

    /// Which camera to start with (front, back)
    #[arg(short, long, default_value = "front")]
    facing: FacingMode,

    /// Triangle size relative to the shorter frame side (0.1 - 2.0)
    #[arg(short, long, default_value_t = Scale::DEFAULT)]
    scale: f64,

    /// Output surface width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Output surface height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Render ticks per second
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Stop after this many ticks (defaults to 1 with --image)
    #[arg(long)]
    ticks: Option<u64>,

    /// Export once the loop stops (display, pattern); repeatable
    #[arg(short, long)]
    export: Vec<ExportMode>,

    /// Directory exported PNGs are written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
}

/// One line typed on stdin while the loop runs.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Command {
    Scale(f64),
    Facing(FacingMode),
    Export(ExportMode),
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let arg = words.next().unwrap_or_default();
        match verb {
            "scale" => arg
                .parse()
                .map(Command::Scale)
                .map_err(|_| format!("invalid scale `{arg}`")),
            "facing" => arg.parse().map(Command::Facing),
            "export" => arg.parse().map(Command::Export),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!(
                "unknown command `{other}` (scale <v>, facing front|back, export display|pattern, quit)"
            )),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    if args.list_cameras {
        return list_cameras();
    }

    let provider = build_provider(&args)?;
    let config = KaleidoConfig::default()
        .with_scale(Scale::new(args.scale))
        .with_facing(args.facing);
    let options = LoopOptions {
        max_ticks: args.ticks.or(args.image.as_ref().map(|_| 1)),
    };
    let exporter = Exporter::new(&args.out_dir);
    log::info!("exports go to {}", exporter.out_dir().display());

    let mut render_loop = RenderLoop::new(
        provider,
        config,
        (args.width, args.height),
        exporter,
        options,
    )?;

    let events = render_loop.events();
    let reporter = thread::spawn(move || {
        for event in events.iter() {
            match event {
                LoopEvent::Ready => log::info!("kaleidoscope ready"),
                LoopEvent::AcquisitionFailed(err) => eprintln!("{err}"),
                LoopEvent::Exported(path) => println!("{}", path.display()),
                LoopEvent::ExportFailed(err) => eprintln!("export failed: {err}"),
                LoopEvent::Stopped(_) => break,
            }
        }
    });

    spawn_command_reader(render_loop.handle());

    // The loop keeps running without a source so the facing can be changed.
    let _ = render_loop.start();
    let reason = render_loop.run(&mut FixedRateScheduler::new(args.fps));
    let _ = reporter.join();

    let mut failed_exports = 0;
    for mode in args.export {
        match render_loop.export(ExportRequest { mode }) {
            Ok(path) => println!("{}", path.display()),
            Err(err) => {
                log::error!("{} export failed: {err}", mode.label());
                failed_exports += 1;
            }
        }
    }

    match reason {
        StopReason::InvariantViolation(err) => Err(err.into()),
        _ if failed_exports > 0 => bail!("{failed_exports} export(s) failed"),
        _ => Ok(()),
    }
}

fn build_provider(args: &Args) -> Result<Box<dyn SourceProvider>> {
    if let Some(path) = &args.image {
        return Ok(Box::new(StillImageProvider::new(path)));
    }
    camera_provider(args.camera)
}

#[cfg(feature = "camera-nokhwa")]
fn camera_provider(index: Option<u32>) -> Result<Box<dyn SourceProvider>> {
    let provider = index
        .map(pipeline::CameraProvider::pinned)
        .unwrap_or_default();
    Ok(Box::new(provider))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn camera_provider(_index: Option<u32>) -> Result<Box<dyn SourceProvider>> {
    bail!("built without camera support, pass --image")
}

#[cfg(feature = "camera-nokhwa")]
fn list_cameras() -> Result<()> {
    let cameras = pipeline::available_cameras()?;
    if cameras.is_empty() {
        return Err(anyhow!("no cameras found"));
    }
    for camera in cameras {
        println!("{}\t{}", camera.index, camera.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn list_cameras() -> Result<()> {
    Err(anyhow!("built without camera support"))
}

/// Forwards stdin commands to the loop. The thread is left detached since a
/// blocking read cannot be interrupted.
fn spawn_command_reader(handle: RenderHandle) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(Command::Scale(value)) => handle.set_scale(value),
                Ok(Command::Facing(facing)) => handle.set_facing(facing),
                Ok(Command::Export(mode)) => {
                    // The loop reports the outcome on the event channel.
                    let _ = handle.export(ExportRequest { mode });
                }
                Ok(Command::Quit) => {
                    handle.stop();
                    break;
                }
                Err(err) => eprintln!("{err}"),
            }
        }
    });
}
