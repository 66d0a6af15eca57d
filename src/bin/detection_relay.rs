//! detection_relay - capture, detect, publish over MQTT, and log what
//! arrives on the topic into SQLite.
//!
//! Sequence: load labels and the detector, open the detection log, connect
//! and subscribe, run the publish schedule, disconnect, drain the logger,
//! then print the detection report.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use detection_relay::{
    load_backend, open_source, render_report, DetectionLogger, DetectionPipeline, LabelTable,
    LoopbackChannel, MessageChannel, MqttChannel, Publisher, RelayConfig, SqliteDetectionLog,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish object detections over MQTT and log them to SQLite"
)]
struct Args {
    /// Number of publish cycles (0 runs until interrupted).
    #[arg(long, env = "RELAY_PUBLISH_COUNT")]
    count: Option<u32>,

    /// Seconds between publish cycles.
    #[arg(long, env = "RELAY_PUBLISH_INTERVAL_SECS")]
    interval_secs: Option<u64>,

    /// Deliver messages in-process instead of through a broker.
    #[arg(long)]
    loopback: bool,

    /// Skip the final report.
    #[arg(long)]
    no_report: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = RelayConfig::load()?;
    if let Some(count) = args.count {
        cfg.schedule.count = (count > 0).then_some(count);
    }
    if let Some(secs) = args.interval_secs {
        if secs == 0 {
            return Err(anyhow!("--interval-secs must be greater than zero"));
        }
        cfg.schedule.interval = Duration::from_secs(secs);
    }

    let labels = LabelTable::load(&cfg.labels_path)
        .with_context(|| format!("failed to load labels from {}", cfg.labels_path.display()))?;
    let detector = load_backend(&cfg.model).context("failed to load detector")?;
    let source = open_source(cfg.camera.clone()).context("failed to open frame source")?;
    let store = SqliteDetectionLog::open(&cfg.db_path)
        .with_context(|| format!("failed to open detection log {}", cfg.db_path))?;
    log::info!("detection log ready: {}", cfg.db_path);

    let channel: Box<dyn MessageChannel> = if args.loopback {
        log::info!("using in-process loopback channel");
        Box::new(LoopbackChannel::new())
    } else {
        Box::new(MqttChannel::connect(&cfg.mqtt)?)
    };

    let rx = channel.subscribe(&cfg.mqtt.topic)?;
    let logger = DetectionLogger::new(store, cfg.bbox).spawn(rx)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::warn!("interrupt received; stopping after the current cycle");
            stop.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let publisher = Publisher::new(channel.as_ref(), cfg.mqtt.topic.clone());
    let mut pipeline = DetectionPipeline::new(source, detector, labels, cfg.model.input, publisher);
    let schedule_report = pipeline.run_schedule(&cfg.schedule, &stop);
    drop(pipeline);

    channel.disconnect()?;
    log::info!("{} channel disconnected; delivery stopped", channel.kind());
    let (stats, _store) = logger.join()?;
    log::info!(
        "published {} of {} cycle(s); logged {}, skipped {}, failed {}",
        schedule_report.published,
        schedule_report.cycles,
        stats.logged,
        stats.skipped,
        stats.failed
    );

    if !args.no_report {
        let report = render_report(&cfg.db_path)
            .with_context(|| format!("failed to read detection log {}", cfg.db_path))?;
        println!();
        print!("{}", report);
    }
    Ok(())
}
