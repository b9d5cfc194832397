// src/main.rs
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use edl_acquire::config::SessionConfig;
use edl_acquire::drivers::{AcquisitionReport, BinarySink, SessionError, SimulatedAmplifier};
use edl_acquire::edl::EdlLibrary;
use edl_acquire::engine::{self, SessionHandle};
use edl_acquire::types::{
    ConnectionMode, CurrentRange, FinalBandwidth, SamplingRate, SessionEvent,
};

/// Record voltage/current traces from an EDL patch-clamp amplifier.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON session config; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Raw output file (interleaved little-endian f32: voltage, current)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Use the built-in simulated amplifier instead of the vendor library
    #[arg(long)]
    simulate: bool,
    /// Path to the EDL C library
    #[arg(long)]
    library: Option<PathBuf>,
    #[arg(long)]
    iterations: Option<u32>,
    /// Minimum number of buffered packets before a read is issued
    #[arg(long)]
    min_packets: Option<usize>,
    #[arg(long, value_enum)]
    sampling_rate: Option<SamplingRate>,
    #[arg(long, value_enum)]
    range: Option<CurrentRange>,
    #[arg(long, value_enum)]
    bandwidth: Option<FinalBandwidth>,
    /// Apply the seal test protocol before recording
    #[arg(long)]
    seal_test: bool,
    /// Stop acquiring after this many seconds even if iterations remain
    #[arg(long)]
    max_seconds: Option<f64>,
    /// Write the default session config to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if self.simulate {
            config.mode = ConnectionMode::Simulation;
        }
        if let Some(library) = &self.library {
            config.library_path = library.clone();
        }
        if let Some(iterations) = self.iterations {
            config.acquisition.iterations = iterations;
        }
        if let Some(min_packets) = self.min_packets {
            config.acquisition.min_packets_to_read = min_packets;
        }
        if let Some(rate) = self.sampling_rate {
            config.modality.sampling_rate = rate;
        }
        if let Some(range) = self.range {
            config.modality.range = range;
        }
        if let Some(bandwidth) = self.bandwidth {
            config.modality.bandwidth = bandwidth;
        }
        if self.seal_test && config.seal_test.is_none() {
            config.seal_test = Some(Default::default());
        }
    }
}

fn time_limit(seconds: Option<f64>) -> Result<Option<Duration>> {
    seconds
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("--max-seconds must be a finite, non-negative number of seconds")
}

// 把后台线程的事件转成日志，超时后请求停止采集
fn watch(handle: SessionHandle, limit: Option<Duration>) -> Result<AcquisitionReport, SessionError> {
    let started = Instant::now();
    loop {
        match handle.events().recv_timeout(Duration::from_millis(100)) {
            Ok(SessionEvent::Log(line)) => log::info!("{line}"),
            Ok(SessionEvent::Connected(id)) => log::info!("device {id} connected"),
            Ok(SessionEvent::Configured) => log::info!("working modality committed"),
            Ok(SessionEvent::Compensated) => log::info!("digital offset compensated"),
            Ok(SessionEvent::AcquisitionStarted) => log::info!("acquisition started"),
            Ok(SessionEvent::Finished(report)) => log::debug!("session finished: {report:?}"),
            Ok(SessionEvent::Failed(reason)) => log::error!("session failed: {reason}"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            handle.cancel();
        }
    }
    handle.join()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        SessionConfig::default().save(path)?;
        println!("default config written to {}", path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    };
    args.apply(&mut config);
    let limit = time_limit(args.max_seconds)?;
    let unit = config.modality.range.current_unit();

    let output = config.output.clone();
    let open_sink = || {
        BinarySink::create(&output)
            .map_err(SessionError::Output)
            .with_context(|| format!("cannot write {}", output.display()))
    };
    let handle = match config.mode {
        ConnectionMode::Hardware => {
            let device = EdlLibrary::open(&config.library_path)
                .context("EDL library could not be loaded (use --simulate to run offline)")?;
            engine::spawn_session(config, device, open_sink()?)
        }
        ConnectionMode::Simulation => {
            let device = SimulatedAmplifier::new(config.simulation_buffer_seconds);
            engine::spawn_session(config, device, open_sink()?)
        }
    };
    let report = watch(handle, limit)?;

    println!(
        "{} packets (mV, {unit}) written to {} in {} reads",
        report.packets_written,
        output.display(),
        report.reads
    );
    if !report.is_clean() {
        println!(
            "warnings: {} buffer overflow, {} lost data, {} short reads, {} read errors",
            report.overflow_warnings,
            report.lost_data_warnings,
            report.truncated_reads,
            report.read_errors
        );
    }
    if report.cancelled {
        println!("stopped early after {} iterations", report.iterations);
    }
    Ok(())
}
