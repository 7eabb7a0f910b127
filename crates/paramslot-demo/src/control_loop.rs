// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Control-loop simulation.
//!
//! One "dsp" thread ticks at a fixed period and picks up whatever the "ui"
//! threads last published. Producers sweep a lowpass cutoff; the first
//! producer also publishes gain ramps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use paramslot::realtime::{NotifyingParam, Packed, ParamReader, ParamWriter};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DemoConfig};
use crate::dsp::{gain_table, Biquad, BiquadCoeffs, GainRamp, SmoothedGain};

/// Steps in one full cutoff sweep.
const SWEEP_STEPS: u64 = 64;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to spawn {0} thread: {1}")]
    Spawn(String, std::io::Error),
    #[error("{0} thread panicked")]
    Panicked(String),
}

/// Counters reported by the DSP thread.
#[derive(Debug, Clone, Default)]
pub struct DspStats {
    pub ticks: u64,
    pub coeff_pickups: u64,
    pub gain_pickups: u64,
    /// Ticks whose processing overran the period.
    pub overruns: u64,
    pub final_coeffs: BiquadCoeffs,
    pub final_gain: f32,
    pub peak: f64,
}

/// What a producer thread did.
#[derive(Debug, Clone)]
pub struct ProducerStats {
    pub published: u64,
    pub last_coeffs: Option<BiquadCoeffs>,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dsp: DspStats,
    pub producers: Vec<ProducerStats>,
    pub coeffs_lock_free: bool,
    pub gain_lock_free: bool,
}

impl RunReport {
    pub fn total_published(&self) -> u64 {
        self.producers.iter().map(|p| p.published).sum()
    }
}

/// Starts the worker threads of a run.
pub trait Spawner {
    fn spawn<T, F>(&mut self, name: &str, f: F) -> Result<JoinHandle<T>, LoopError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static;
}

/// Named OS threads.
pub struct OsThreads;

impl Spawner for OsThreads {
    fn spawn<T, F>(&mut self, name: &str, f: F) -> Result<JoinHandle<T>, LoopError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|e| LoopError::Spawn(name.to_string(), e))
    }
}

/// Run the simulation described by `config` to completion.
pub fn run(config: &DemoConfig) -> Result<RunReport, LoopError> {
    run_with(config, &mut OsThreads)
}

/// Like [`run`], starting threads through `spawner`.
///
/// If a thread fails to start, every thread already started is stopped and
/// joined before the error is returned.
pub fn run_with<S: Spawner>(
    config: &DemoConfig,
    spawner: &mut S,
) -> Result<RunReport, LoopError> {
    config.validate()?;

    let control = &config.control;
    let period = Duration::from_micros(control.period_us);
    let block_len = control.block_len();

    // Build the gain table off the real-time thread.
    let table_len = gain_table().len();
    debug!("Gain table ready ({} entries)", table_len);

    let initial = BiquadCoeffs::lowpass(
        config.producers.cutoff_start_hz,
        config.producers.q,
        control.sample_rate,
    );
    let (coeff_writer, coeff_reader) = NotifyingParam::new(initial).split();
    let (gain_writer, gain_reader) = NotifyingParam::new(Packed(GainRamp::unity())).split();

    info!(
        "Starting control loop: period {:?}, {} samples/block, {} producers",
        period, block_len, config.producers.count
    );

    let dsp_running = Arc::new(AtomicBool::new(true));
    let producers_running = Arc::new(AtomicBool::new(true));

    let dsp = spawner.spawn("dsp", {
        let running = Arc::clone(&dsp_running);
        let sample_rate = control.sample_rate;
        move || dsp_loop(coeff_reader, gain_reader, initial, period, block_len, sample_rate, &running)
    })?;

    let mut producers = Vec::with_capacity(config.producers.count);
    for index in 0..config.producers.count {
        let job = Producer {
            index: index as u64,
            coeffs: coeff_writer.clone(),
            gain: (index == 0).then(|| gain_writer.clone()),
            config: config.clone(),
        };
        let running = Arc::clone(&producers_running);
        match spawner.spawn(&format!("ui-{index}"), move || job.run(&running)) {
            Ok(handle) => producers.push(handle),
            Err(e) => {
                warn!("{}, stopping {} started threads", e, producers.len() + 1);
                if let Err(join_err) =
                    shut_down(&producers_running, producers, &dsp_running, dsp)
                {
                    warn!("{}", join_err);
                }
                return Err(e);
            }
        }
    }
    drop(coeff_writer);
    drop(gain_writer);

    thread::sleep(Duration::from_millis(control.duration_ms));

    let (dsp, producers) = shut_down(&producers_running, producers, &dsp_running, dsp)?;

    let report = RunReport {
        dsp,
        producers,
        coeffs_lock_free: NotifyingParam::<BiquadCoeffs>::IS_ALWAYS_LOCK_FREE,
        gain_lock_free: NotifyingParam::<Packed<GainRamp>>::IS_ALWAYS_LOCK_FREE,
    };

    if report.dsp.overruns > 0 {
        warn!("{} of {} ticks overran the period", report.dsp.overruns, report.dsp.ticks);
    }

    Ok(report)
}

/// Stop and join all workers. Producers go first so the DSP thread gets to
/// see their last values.
fn shut_down(
    producers_running: &AtomicBool,
    producers: Vec<JoinHandle<ProducerStats>>,
    dsp_running: &AtomicBool,
    dsp: JoinHandle<DspStats>,
) -> Result<(DspStats, Vec<ProducerStats>), LoopError> {
    producers_running.store(false, Ordering::Release);
    let producers = producers
        .into_iter()
        .enumerate()
        .map(|(index, handle)| join(&format!("ui-{index}"), handle))
        .collect::<Result<Vec<_>, _>>();

    dsp_running.store(false, Ordering::Release);
    let dsp = join("dsp", dsp)?;
    Ok((dsp, producers?))
}

fn join<T>(name: &str, handle: JoinHandle<T>) -> Result<T, LoopError> {
    handle.join().map_err(|_| LoopError::Panicked(name.to_string()))
}

fn dsp_loop(
    mut coeff_reader: ParamReader<BiquadCoeffs>,
    mut gain_reader: ParamReader<Packed<GainRamp>>,
    initial: BiquadCoeffs,
    period: Duration,
    block_len: usize,
    sample_rate: f64,
    running: &AtomicBool,
) -> DspStats {
    let mut stats = DspStats::default();
    let mut filter = Biquad::new(initial);
    let mut gain = SmoothedGain::new(GainRamp::unity(), sample_rate as f32);
    let mut coeffs = initial;
    let mut ramp = Packed(GainRamp::unity());
    let mut phase = 0.0f64;
    let phase_step = 440.0 / sample_rate;

    let mut pick_up = |filter: &mut Biquad, gain: &mut SmoothedGain, stats: &mut DspStats| {
        if coeff_reader.try_consume(&mut coeffs) {
            filter.set_coeffs(coeffs);
            stats.coeff_pickups += 1;
        }
        if gain_reader.try_consume(&mut ramp) {
            gain.apply(ramp.into_inner());
            stats.gain_pickups += 1;
        }
    };

    let mut deadline = Instant::now();
    while running.load(Ordering::Acquire) {
        let started = Instant::now();
        pick_up(&mut filter, &mut gain, &mut stats);

        for _ in 0..block_len {
            // Naive sawtooth as a test signal.
            let x = 2.0 * phase - 1.0;
            phase = (phase + phase_step).fract();
            let y = filter.process(x) * gain.next() as f64;
            stats.peak = stats.peak.max(y.abs());
        }

        stats.ticks += 1;
        if started.elapsed() > period {
            stats.overruns += 1;
        }

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }

    // Producers are stopped by now; a skipped cycle may still be pending.
    pick_up(&mut filter, &mut gain, &mut stats);

    stats.final_coeffs = *filter.coeffs();
    stats.final_gain = gain.target();
    debug!(
        "DSP thread done: {} ticks, {} coefficient pickups",
        stats.ticks, stats.coeff_pickups
    );
    stats
}

struct Producer {
    index: u64,
    coeffs: ParamWriter<BiquadCoeffs>,
    gain: Option<ParamWriter<Packed<GainRamp>>>,
    config: DemoConfig,
}

impl Producer {
    fn run(self, running: &AtomicBool) -> ProducerStats {
        let p = &self.config.producers;
        let count = p.count as u64;
        let interval = Duration::from_millis(p.interval_ms);
        let ratio = p.cutoff_end_hz / p.cutoff_start_hz;

        let mut stats = ProducerStats {
            published: 0,
            last_coeffs: None,
        };
        let mut step = 0u64;

        while running.load(Ordering::Acquire) {
            // Producers interleave along one logarithmic sweep.
            let t = ((step * count + self.index) % SWEEP_STEPS) as f64 / (SWEEP_STEPS - 1) as f64;
            let cutoff = p.cutoff_start_hz * ratio.powf(t);
            let coeffs = BiquadCoeffs::lowpass(cutoff, p.q, self.config.control.sample_rate);

            self.coeffs.publish(coeffs);
            stats.published += 1;
            stats.last_coeffs = Some(coeffs);

            if let Some(gain) = &self.gain {
                gain.publish(Packed(GainRamp {
                    target_db: -((step % 24) as f32),
                    ramp_ms: 10.0,
                }));
            }

            step += 1;
            thread::sleep(interval);
        }

        debug!("Producer {} published {} updates", self.index, stats.published);
        stats
    }
}
