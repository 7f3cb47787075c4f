//! End-to-end pipeline tests over synthesized WAV fixtures.

use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use spectra_rs::audio::{Pacing, SourceSpec, SourceState};
use spectra_rs::config::AnalyzerConfig;
use spectra_rs::pipeline::{Pipeline, PipelineError, PipelineState};

fn fixture_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("spectra_rs_{}", name))
}

fn write_sine_wav(path: &Path, freq: f32, seconds: f32, sample_rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let total = (seconds * sample_rate as f32) as usize;
    for i in 0..total {
        let t = i as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * freq * t).sin() * i16::MAX as f32 * 0.8) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn fast_config() -> AnalyzerConfig {
    AnalyzerConfig {
        pacing: Pacing::Fast,
        ..Default::default()
    }
}

fn wait_finished(pipeline: &Pipeline, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !pipeline.is_finished() {
        assert!(
            Instant::now() < deadline,
            "pipeline did not finish in time: {:?}",
            pipeline.diagnostics()
        );
        assert_ne!(pipeline.source_state(), Some(SourceState::Failed));
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_file_analysis_finds_the_tone() {
    // N=1024, H=512 at 48 kHz: 440 Hz lands on bin round(440*1024/48000) = 9
    let path = fixture_path("tone_440.wav");
    write_sine_wav(&path, 440.0, 1.0, 48000, 1);

    let mut pipeline = Pipeline::new(
        fast_config(),
        SourceSpec::File { path: path.clone() },
    )
    .unwrap();

    let bins: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&bins);
    pipeline.on_spectrum(move |s| sink.lock().unwrap().push(s.dominant_bin()));

    pipeline.start().unwrap();
    wait_finished(&pipeline, Duration::from_secs(10));
    pipeline.stop().unwrap();

    let bins = bins.lock().unwrap();
    // 48000 samples, one spectrum per 512-sample hop once 1024 are buffered
    assert_eq!(bins.len(), 92);
    for &bin in bins.iter() {
        assert!(
            (bin as i64 - 9).unsigned_abs() <= 1,
            "dominant bin {} too far from 9",
            bin
        );
    }

    let diag = pipeline.diagnostics();
    assert_eq!(diag.overflows, 0);
    assert_eq!(diag.samples_written, 48000);
    assert_eq!(diag.samples_read, 48000);
    assert_eq!(diag.spectra_emitted, 92);
    assert_eq!(diag.source_state, Some(SourceState::Finished));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_stereo_mixdown_keeps_the_tone() {
    // 880 Hz on both channels: bin round(880*1024/48000) = 19
    let path = fixture_path("tone_880_stereo.wav");
    write_sine_wav(&path, 880.0, 0.5, 48000, 2);

    let mut pipeline = Pipeline::new(
        fast_config(),
        SourceSpec::File { path: path.clone() },
    )
    .unwrap();

    let bins: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&bins);
    pipeline.on_spectrum(move |s| sink.lock().unwrap().push(s.dominant_bin()));

    pipeline.start().unwrap();
    wait_finished(&pipeline, Duration::from_secs(10));
    pipeline.stop().unwrap();

    let bins = bins.lock().unwrap();
    assert!(!bins.is_empty());
    for &bin in bins.iter() {
        assert!(
            (bin as i64 - 19).unsigned_abs() <= 1,
            "dominant bin {} too far from 19",
            bin
        );
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_start_while_running_is_rejected() {
    let path = fixture_path("tone_1k.wav");
    write_sine_wav(&path, 1000.0, 0.5, 48000, 1);

    let mut pipeline = Pipeline::new(
        fast_config(),
        SourceSpec::File { path: path.clone() },
    )
    .unwrap();

    let spectra = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&spectra);
    pipeline.on_spectrum(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    pipeline.start().unwrap();

    // Second start is rejected without disturbing the running pipeline
    match pipeline.start() {
        Err(PipelineError::StateConflict(PipelineState::Running)) => {}
        other => panic!("expected a Running state conflict, got {:?}", other.err()),
    }
    assert_eq!(pipeline.state(), PipelineState::Running);

    wait_finished(&pipeline, Duration::from_secs(10));
    pipeline.stop().unwrap();

    assert!(spectra.load(Ordering::Relaxed) > 0);
    assert_eq!(pipeline.state(), PipelineState::Idle);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_pipeline_restarts_after_stop() {
    let path = fixture_path("tone_restart.wav");
    write_sine_wav(&path, 440.0, 0.25, 48000, 1);

    let mut pipeline = Pipeline::new(
        fast_config(),
        SourceSpec::File { path: path.clone() },
    )
    .unwrap();

    pipeline.start().unwrap();
    wait_finished(&pipeline, Duration::from_secs(10));
    pipeline.stop().unwrap();
    let first_run = pipeline.diagnostics();
    assert!(first_run.spectra_emitted > 0);

    // Counters start over on the second run
    pipeline.start().unwrap();
    wait_finished(&pipeline, Duration::from_secs(10));
    pipeline.stop().unwrap();
    let second_run = pipeline.diagnostics();
    assert_eq!(second_run.samples_written, first_run.samples_written);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_stop_mid_run_is_bounded() {
    // A longer fixture decoded at the source rate, stopped early
    let path = fixture_path("tone_long.wav");
    write_sine_wav(&path, 440.0, 5.0, 48000, 1);

    let mut pipeline = Pipeline::new(
        AnalyzerConfig::default(),
        SourceSpec::File { path: path.clone() },
    )
    .unwrap();

    pipeline.start().unwrap();
    thread::sleep(Duration::from_millis(300));

    let stopped_at = Instant::now();
    pipeline.stop().unwrap();
    assert!(
        stopped_at.elapsed() < Duration::from_secs(2),
        "stop took {:?}",
        stopped_at.elapsed()
    );
    assert_eq!(pipeline.state(), PipelineState::Idle);

    let _ = std::fs::remove_file(&path);
}
