use audio_relay::transport::{SpTransport, Transport};
use audio_relay::{AudioEmitter, RelayConfig};
use clap::Parser;
use hound::{SampleFormat, WavReader};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "audio-relay")]
#[command(about = "Publish audio control events to subscribers over an SP pub/sub socket")]
struct Args {
    /// JSON config file with an optional "relay_server" section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to publish on (overrides config and environment)
    #[arg(short, long)]
    port: Option<i64>,

    /// 44.1kHz 16-bit PCM wave file to stream
    #[arg(short, long)]
    wav: Option<PathBuf>,

    /// Frames per Play message
    #[arg(long, default_value = "352")]
    frames_per_packet: usize,

    /// Volume level to send after Start
    #[arg(long)]
    volume: Option<f64>,

    /// Send Mute after Start
    #[arg(long)]
    mute: bool,

    /// Send as fast as possible instead of in real time
    #[arg(long)]
    no_pacing: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting audio relay");

    let mut config = match RelayConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = Arc::clone(&should_stop);
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down...");
        should_stop_clone.store(true, Ordering::SeqCst);
    })?;

    // Nothing works without a bound socket, so any failure here is fatal
    let mut emitter = match AudioEmitter::bind(SpTransport::default(), &config) {
        Ok(emitter) => emitter,
        Err(e) => {
            error!("❌ Could not start audio relay: {}", e);
            std::process::exit(1);
        }
    };

    let result = match &args.wav {
        Some(path) => stream_wav(&mut emitter, path, &args, &should_stop),
        None => {
            info!("👂 No input file, idling until Ctrl+C");
            while !should_stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(100));
            }
            Ok(())
        }
    };

    emitter.shutdown();

    if let Err(e) = result {
        error!("❌ Audio relay failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn stream_wav<T: Transport>(
    emitter: &mut AudioEmitter<T>,
    path: &Path,
    args: &Args,
    should_stop: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    info!(
        "📊 {}: {}Hz, {} channels, {} bits",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    if spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
        return Err(format!(
            "Expected 16-bit integer PCM, got {} bits {:?}",
            spec.bits_per_sample, spec.sample_format
        )
        .into());
    }

    let sample_rate = i32::try_from(spec.sample_rate)?;
    emitter.notify_start(sample_rate)?;

    if let Some(level) = args.volume {
        emitter.set_volume(level)?;
    }
    if args.mute {
        emitter.set_mute(1)?;
    }

    let frames_per_packet = args.frames_per_packet.max(1);
    let samples_per_packet = packet_samples(frames_per_packet, spec.channels)?;
    let packet_duration = Duration::from_secs_f64(frames_per_packet as f64 / spec.sample_rate as f64);

    let mut packet = Vec::new();
    let mut samples = reader.samples::<i16>();
    let mut deadline = Instant::now();
    let mut packets = 0u64;

    loop {
        if should_stop.load(Ordering::SeqCst) {
            warn!("⏹️  Interrupted, flushing subscribers");
            emitter.notify_flush()?;
            break;
        }

        packet.clear();
        for sample in samples.by_ref().take(samples_per_packet) {
            packet.push(sample?);
        }
        if packet.is_empty() {
            break;
        }

        emitter.send_samples(&packet)?;
        packets += 1;

        if !args.no_pacing {
            deadline += packet_duration;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
        }
    }

    emitter.notify_stop()?;
    info!("✅ Streamed {} packets from {}", packets, path.display());
    Ok(())
}

fn packet_samples(frames_per_packet: usize, channels: u16) -> Result<usize, String> {
    frames_per_packet
        .checked_mul(usize::from(channels))
        .ok_or_else(|| {
            format!(
                "{} frames of {} channels do not fit in one packet",
                frames_per_packet, channels
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_samples() {
        assert_eq!(packet_samples(352, 2).unwrap(), 704);
        assert_eq!(packet_samples(352, 1).unwrap(), 352);
    }

    #[test]
    fn test_packet_samples_overflow() {
        assert!(packet_samples(usize::MAX, 2).is_err());
        assert!(packet_samples(usize::MAX / 2 + 1, 2).is_err());
    }
}
