//! Playout server: composites each configured channel at its frame rate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use playout::producer::{
    ColorProducer, FrameProducer, PlaylistProducer, RerouteStats, SeparatedProducer,
};
use playout::{Config, VideoChannel};

/// BGRA
const COLORS: [[u8; 4]; 3] = [[64, 32, 16, 255], [16, 128, 16, 255], [160, 64, 32, 255]];

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("playout=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Playout Launching...");

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    debug!("{:?}", config);

    let layouts = config.layout_repository()?;
    let mix_configs = Arc::new(config.mix_config_repository());

    let mut channels = Vec::new();
    for (i, channel_config) in config.channels.iter().enumerate() {
        let format = channel_config.format(&layouts)?;
        let channel = VideoChannel::new(i + 1, format, Arc::clone(&mix_configs), &config.pipeline)?;
        channel.load(10, demo_playlist(&channel))?;
        channels.push(Arc::new(channel));
    }

    // Key a translucent copy of channel 1 over channel 2.
    let mut reroute_stats = None;
    if let [first, second, ..] = channels.as_slice() {
        let reroute = first.reroute_to(second)?;
        reroute_stats = Some(reroute.sink());

        let format = second.format();
        let key = ColorProducer::new([128, 128, 128, 255], &format);
        let keyed = SeparatedProducer::new(Box::new(reroute), Box::new(key));
        second.load(20, Box::new(keyed))?;
    }

    let mut tickers = Vec::new();
    for channel in &channels {
        let channel = Arc::clone(channel);
        tickers.push(tokio::spawn(async move { run(channel).await }));
    }

    let report = tokio::spawn(async move {
        let Some(sink) = reroute_stats else {
            return;
        };
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let RerouteStats {
                pushed,
                dropped,
                skipped,
                late,
                delivered,
            } = sink.stats();
            info!(
                "reroute: pushed {} delivered {} skipped {} dropped {} late {}",
                pushed, delivered, skipped, dropped, late
            );
        }
    });

    let run_seconds = config.pipeline.run_seconds;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Interrupted");
        }
        _ = tokio::time::sleep(Duration::from_secs(run_seconds)), if run_seconds > 0 => {
            info!("Ran for {} seconds", run_seconds);
        }
    }

    report.abort();
    for ticker in tickers {
        ticker.abort();
    }
    drop(channels);

    info!("Playout shutting down");
    Ok(())
}

/// Tick `channel` at its frame rate until the task is aborted.
async fn run(channel: Arc<VideoChannel>) {
    let mut interval = tokio::time::interval(channel.format().video.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut frames: u64 = 0;
    loop {
        interval.tick().await;

        let frame = match channel.tick() {
            Ok(deferred) => deferred.get_async().await,
            Err(e) => {
                error!("channel[{}] stopped ticking: {}", channel.index(), e);
                return;
            }
        };

        match frame {
            Ok(frame) if frame.is_ready() => {
                frames += 1;
                if frames % 250 == 0 {
                    debug!("channel[{}] {} frames", channel.index(), frames);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("channel[{}] tick lost: {}", channel.index(), e),
        }
    }
}

/// Two colors alternating every two seconds
fn demo_playlist(channel: &VideoChannel) -> Box<dyn FrameProducer> {
    let format = channel.format();
    let frames = (format.video.fps() * 2.0).round() as u64;
    let color = COLORS[channel.index() % COLORS.len()];

    let mut playlist = PlaylistProducer::new();
    playlist.set_loop(true);
    playlist.push_back(Box::new(ColorProducer::new(color, &format).take(frames)));
    playlist.push_back(Box::new(ColorProducer::new([0, 0, 0, 255], &format).take(frames)));
    Box::new(playlist)
}
