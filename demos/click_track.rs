//! Runs the analysis loop and the render loop on two threads against a
//! synthetic click track and prints the clock once per beat.
//!
//! `cargo run --example click_track -- 128`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taktgeber::{pipeline, AudioTime, ClickTrack, HopSource, PipelineConfig};
use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let bpm: f32 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(120.0);

    let config = PipelineConfig::default();
    let parts = pipeline(&config).expect("default config is valid");
    let (mut tracker, mut clock) = (parts.tracker, parts.clock);

    let hop = Duration::from_secs_f32(config.hop_secs());
    let running = Arc::new(AtomicBool::new(true));
    // sample index of the newest hop, shared so the renderer can follow capture time
    let capture_time = Arc::new(AtomicU64::new(0));

    let analysis = {
        let running = running.clone();
        let capture_time = capture_time.clone();
        thread::spawn(move || {
            let mut track = ClickTrack::new(bpm, config.sample_rate, config.hop_size);
            while running.load(Ordering::Relaxed) {
                let hop_data = track.next_hop();
                tracker.process_hop(&hop_data);
                capture_time.store(hop_data.time.sample_index, Ordering::Release);
                thread::sleep(hop);
            }
        })
    };

    let render = {
        let running = running.clone();
        thread::spawn(move || {
            let tick = hop / 2;
            let step = config.hop_size as u64 / 2;
            let mut render_time = 0u64;
            while running.load(Ordering::Relaxed) {
                // advance at render cadence without running ahead of capture
                let captured_end = capture_time.load(Ordering::Acquire) + config.hop_size as u64;
                render_time = (render_time + step).min(captured_end).max(render_time);
                let snap = clock.tick(AudioTime::new(render_time, config.sample_rate));
                if snap.beat_tick {
                    info!(
                        beat = snap.beat_index,
                        beat_in_bar = snap.beat_in_bar,
                        bpm = snap.bpm,
                        confidence = snap.confidence,
                        state = ?snap.state,
                        "beat"
                    );
                }
                thread::sleep(tick);
            }
        })
    };

    thread::sleep(Duration::from_secs(30));
    running.store(false, Ordering::Relaxed);
    analysis.join().expect("analysis thread panicked");
    render.join().expect("render thread panicked");
}
