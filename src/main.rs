//!   modes1090:   A Mode S / ADS-B 1090ES decoder for RTL-SDR devices
//!
//!  Rust port of antirez/dump1090, generalized into a headless logging
//!  receiver: no interactive display, no network server, one SDR backend.

mod aircraft;
mod config;
mod cpr;
mod crc;
mod decoder;
mod demodulator;
mod error;
mod log_writer;
mod magnitude;
mod sample_source;
mod sbs;
mod scorer;
mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::RwLock;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::aircraft::AircraftStore;
use crate::config::Config;
use crate::decoder::ModesMessage;
use crate::demodulator::Demodulator;
use crate::log_writer::{LogWriter, NullWriter, RotatingFileWriter, report_write_failure};
use crate::magnitude::MagnitudeLut;
use crate::sample_source::{CHUNK_QUEUE_DEPTH, RtlSdrSource};
use crate::stats::Stats;

/// Grace period after a cancellation signal before the process exits
/// regardless of whether the processing task has drained its queue.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_args();

    let level = if config.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    info!("modes1090 {} starting", config::VERSION);
    info!("configuration: {:?}", config);

    let aircraft_store = Arc::new(RwLock::new(AircraftStore::with_min_messages(
        config.aircraft_ttl,
        config.min_messages,
    )));
    let stats = Arc::new(Stats::new());

    let (msg_tx, msg_rx): (Sender<ModesMessage>, Receiver<ModesMessage>) = bounded(1024);

    let rt = tokio::runtime::Runtime::new()?;

    let device_failed = rt.block_on(async {
        let shutdown = Arc::new(AtomicBool::new(false));
        let device_failure = Arc::new(AtomicBool::new(false));

        let processor_handle = {
            let store = Arc::clone(&aircraft_store);
            let config = config.clone();
            let stats = Arc::clone(&stats);
            tokio::task::spawn_blocking(move || {
                process_messages(msg_rx, store, config, stats);
            })
        };

        let cleanup_handle = {
            let store = Arc::clone(&aircraft_store);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                while !shutdown.load(Ordering::Relaxed) {
                    interval.tick().await;
                    store.write().remove_stale();
                }
            })
        };

        let stats_handle = {
            let stats = Arc::clone(&stats);
            let shutdown = Arc::clone(&shutdown);
            let interval_secs = config.stats_interval_secs.max(1);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
                interval.tick().await; // don't fire immediately on startup
                while !shutdown.load(Ordering::Relaxed) {
                    interval.tick().await;
                    info!("{}", stats.snapshot_line());
                }
            })
        };

        let acquisition_handles =
            spawn_acquisition(&config, &aircraft_store, &stats, &msg_tx, &device_failure);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
            }
            _ = wait_for_all(acquisition_handles) => {
                info!("sample pipeline exited");
            }
        }

        shutdown.store(true, Ordering::Relaxed);
        cleanup_handle.abort();
        stats_handle.abort();
        drop(msg_tx);

        tokio::select! {
            _ = processor_handle => {}
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                warn!("processing task did not finish within the shutdown grace period, exiting anyway");
            }
        }

        device_failure.load(Ordering::Relaxed)
    });

    if device_failed {
        std::process::exit(1);
    }

    Ok(())
}

/// Spawns the acquisition task. File/stdin replay demodulates inline on one
/// blocking task (the read rate is not time-sensitive); live RTL-SDR capture
/// splits acquisition and demodulation across two tasks joined by a bounded
/// queue per the shared-resource policy, so a slow decode cycle drops the
/// newest chunk instead of blocking the subprocess reader.
fn spawn_acquisition(
    config: &Config,
    store: &Arc<RwLock<AircraftStore>>,
    stats: &Arc<Stats>,
    msg_tx: &Sender<ModesMessage>,
    device_failure: &Arc<AtomicBool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    if let Some(ref filename) = config.filename {
        let filename = filename.clone();
        let config = config.clone();
        let stats = Arc::clone(stats);
        let store = Arc::clone(store);
        let msg_tx = msg_tx.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let demodulator = Demodulator::new(config);
            let mut known_icao = |addr: u32| store.read().is_known_icao(addr);
            let mut note_icao = |addr: u32| store.write().note_known_icao(addr);
            info!("reading from file: {}", filename);
            if let Err(e) =
                demodulator.process_file(&filename, &msg_tx, &mut known_icao, &mut note_icao, &stats)
            {
                error!("error processing file: {}", e);
            }
        });
        vec![handle]
    } else {
        let acquire_config = config.clone();
        let process_config = config.clone();
        let stats_acquire = Arc::clone(stats);
        let stats_process = Arc::clone(stats);
        let store = Arc::clone(store);
        let msg_tx = msg_tx.clone();
        let device_failure = Arc::clone(device_failure);

        let (chunk_tx, chunk_rx) = bounded::<Vec<u16>>(CHUNK_QUEUE_DEPTH);

        let acquire_handle = tokio::task::spawn_blocking(move || {
            info!("attempting to read from RTL-SDR device {}", acquire_config.dev_index);
            let mut source = match RtlSdrSource::spawn(&acquire_config) {
                Ok(source) => source,
                Err(e) => {
                    error!("{}", e);
                    eprintln!("Make sure rtl-sdr is installed (e.g. `apt install rtl-sdr`)");
                    eprintln!("or use --ifile to read from a captured file instead.");
                    device_failure.store(true, Ordering::Relaxed);
                    return;
                }
            };
            let mag_lut = MagnitudeLut::new();
            if let Err(e) = sample_source::acquire(&mut source, &mag_lut, &chunk_tx, &stats_acquire) {
                error!("sample acquisition failed: {}", e);
            }
        });

        let process_handle = tokio::task::spawn_blocking(move || {
            let demodulator = Demodulator::new(process_config);
            let mut known_icao = |addr: u32| store.read().is_known_icao(addr);
            let mut note_icao = |addr: u32| store.write().note_known_icao(addr);
            sample_source::process_chunks(
                &chunk_rx,
                &demodulator,
                &msg_tx,
                &mut known_icao,
                &mut note_icao,
                &stats_process,
            );
        });

        vec![acquire_handle, process_handle]
    }
}

async fn wait_for_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

fn process_messages(
    rx: Receiver<ModesMessage>,
    store: Arc<RwLock<AircraftStore>>,
    config: Config,
    stats: Arc<Stats>,
) {
    let mut writer: Box<dyn LogWriter + Send> = match &config.log_dir {
        Some(dir) => match RotatingFileWriter::new(dir, config.utc) {
            Ok(w) => Box::new(w),
            Err(e) => {
                error!("could not open log directory {}: {}", dir, e);
                Box::new(NullWriter)
            }
        },
        None => Box::new(NullWriter),
    };

    while let Ok(msg) = rx.recv() {
        if msg.crc_ok || !config.check_crc {
            let aircraft = {
                let mut store = store.write();
                store.update_from_message(&msg, &stats).cloned()
            };

            if let Some(aircraft) = aircraft {
                if let Some(line) = sbs::format_line(&msg, &aircraft, chrono::Utc::now(), config.utc) {
                    if let Err(e) = writer.write_line(&line) {
                        report_write_failure(&e, &stats);
                    }
                }
            }
        }

        if config.raw {
            println!("{}", msg.to_raw_string());
        } else if config.onlyaddr {
            println!("{:06X}", msg.icao_address());
        } else {
            println!("{}", msg);
        }
    }

    warn!("message channel closed, processing task exiting");
}
