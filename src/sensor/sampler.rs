//! Sampling functions that drive simulated sensors
//!
//! A [`Sampler`] produces one raw value per call and may keep internal
//! simulation state (a time counter, a counter value, an RNG). Any
//! `FnMut() -> f64 + Send` closure is a sampler, which makes it easy to feed
//! fixed sequences in tests.
//!
//! # Models
//!
//! - [`WaterLevelModel`] - slow tidal sinusoid, gaussian noise and rare
//!   rain bursts, clamped to the physical 0-200 cm range
//! - [`TemperatureModel`] - daily and seasonal sinusoids, gaussian noise and
//!   rare weather jumps, rounded to 0.1 °C
//! - [`PatternSampler`] - generic signals ([`Pattern`]) with optional
//!   uniform noise
//!
//! Every model takes an optional seed so runs can be reproduced.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Source of raw sensor values
pub trait Sampler: Send {
    /// Produce the next raw value
    fn sample(&mut self) -> f64;
}

impl<F> Sampler for F
where
    F: FnMut() -> f64 + Send,
{
    fn sample(&mut self) -> f64 {
        self()
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Simulated reservoir water level in centimetres
#[derive(Debug, Clone)]
pub struct WaterLevelModel {
    /// Level the simulation oscillates around
    pub base_level: f64,
    /// Peak-to-peak amplitude of the slow tidal component
    pub variation: f64,
    time_counter: f64,
    rng: StdRng,
}

impl WaterLevelModel {
    /// Lowest physically possible reading
    pub const MIN_LEVEL: f64 = 0.0;
    /// Highest physically possible reading
    pub const MAX_LEVEL: f64 = 200.0;

    /// Create a model around `base_level` with the given variation
    pub fn new(base_level: f64, variation: f64, seed: Option<u64>) -> Self {
        Self {
            base_level,
            variation,
            time_counter: 0.0,
            rng: make_rng(seed),
        }
    }
}

impl Default for WaterLevelModel {
    fn default() -> Self {
        Self::new(50.0, 10.0, None)
    }
}

impl Sampler for WaterLevelModel {
    fn sample(&mut self) -> f64 {
        self.time_counter += 0.1;

        let tidal = (self.time_counter * 0.1).sin() * self.variation * 0.5;
        let noise = self.rng.sample::<f64, _>(StandardNormal) * 0.5;

        // Rain events: 1% chance of a sudden jump
        let burst = if self.rng.random::<f64>() < 0.01 {
            let change = self.rng.random_range(-5.0..15.0);
            tracing::debug!("Water level burst: {:.2}cm", change);
            change
        } else {
            0.0
        };

        (self.base_level + tidal + noise + burst).clamp(Self::MIN_LEVEL, Self::MAX_LEVEL)
    }
}

/// Simulated water temperature in °C
#[derive(Debug, Clone)]
pub struct TemperatureModel {
    /// Mean temperature
    pub base_temperature: f64,
    /// Amplitude of the day/night swing
    pub daily_variation: f64,
    time_counter: f64,
    rng: StdRng,
}

impl TemperatureModel {
    /// Create a model around `base_temperature`
    pub fn new(base_temperature: f64, daily_variation: f64, seed: Option<u64>) -> Self {
        Self {
            base_temperature,
            daily_variation,
            time_counter: 0.0,
            rng: make_rng(seed),
        }
    }
}

impl Default for TemperatureModel {
    fn default() -> Self {
        Self::new(20.0, 8.0, None)
    }
}

impl Sampler for TemperatureModel {
    fn sample(&mut self) -> f64 {
        self.time_counter += 0.1;

        let daily = (self.time_counter * 0.05).sin() * self.daily_variation;
        let seasonal = (self.time_counter * 0.001).sin() * 5.0;
        let noise = self.rng.sample::<f64, _>(StandardNormal) * 0.2;

        // Weather fronts: 0.5% chance of a jump
        let weather = if self.rng.random::<f64>() < 0.005 {
            let change = self.rng.random_range(-3.0..3.0);
            tracing::debug!("Temperature jump: {:.2}°C", change);
            change
        } else {
            0.0
        };

        let temperature = self.base_temperature + daily + seasonal + noise + weather;
        (temperature * 10.0).round() / 10.0
    }
}

/// Shape of a periodic [`Pattern::Wave`], at unit amplitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    /// Ramp from 0 to 1, then drop back
    Sawtooth,
    /// +1 for the first half period, -1 for the second
    Square,
    /// -1 up to +1 at mid period and back down
    Triangle,
}

impl Waveform {
    /// Value at `phase` in `[0, 1)`
    fn at(self, phase: f64) -> f64 {
        match self {
            Waveform::Sawtooth => phase,
            Waveform::Square if phase < 0.5 => 1.0,
            Waveform::Square => -1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Signal shapes for generic simulated sensors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Pattern {
    /// Fixed value
    Constant { value: f64 },
    /// `offset + amplitude * sin(2π * frequency * t)`
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Adds `step` per sample, wrapping within `[min, max]`
    Counter { step: f64, min: f64, max: f64 },
    /// Uniform in `[min, max)`
    Random { min: f64, max: f64 },
    /// Periodic wave repeating every `period` seconds
    Wave {
        wave: Waveform,
        period: f64,
        amplitude: f64,
    },
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Sine {
            frequency: 1.0,
            amplitude: 100.0,
            offset: 0.0,
        }
    }
}

impl Pattern {
    /// Reject parameters that would make every sample invalid
    pub fn validate(&self) -> std::result::Result<(), String> {
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        match *self {
            Pattern::Constant { value } if !value.is_finite() => {
                Err("constant value must be finite".to_string())
            }
            Pattern::Sine {
                frequency,
                amplitude,
                offset,
            } if !finite(&[frequency, amplitude, offset]) => {
                Err("sine parameters must be finite".to_string())
            }
            Pattern::Counter { step, min, max } if !finite(&[step, min, max]) || min > max => {
                Err("counter needs finite parameters and min <= max".to_string())
            }
            Pattern::Random { min, max } if !finite(&[min, max]) || min > max => {
                Err("random range needs finite bounds and min <= max".to_string())
            }
            Pattern::Wave {
                period, amplitude, ..
            } if !(period.is_finite() && period > 0.0) || !amplitude.is_finite() => {
                Err("wave period must be positive and amplitude finite".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Position within the current period, in `[0, 1)`
fn phase(elapsed_secs: f64, period: f64) -> f64 {
    (elapsed_secs / period).rem_euclid(1.0)
}

/// Sampler generating a [`Pattern`] against wall-clock time
#[derive(Debug, Clone)]
pub struct PatternSampler {
    /// Signal to generate
    pub pattern: Pattern,
    /// Uniform noise amplitude, 0 for none
    pub noise_amplitude: f64,
    counter: f64,
    started: Instant,
    rng: StdRng,
}

impl PatternSampler {
    /// Create a noiseless sampler
    pub fn new(pattern: Pattern, seed: Option<u64>) -> Self {
        // First sample of a counter lands on min
        let counter = match pattern {
            Pattern::Counter { min, step, .. } => min - step,
            _ => 0.0,
        };
        Self {
            pattern,
            noise_amplitude: 0.0,
            counter,
            started: Instant::now(),
            rng: make_rng(seed),
        }
    }

    /// Add uniform noise in `[-amplitude, amplitude)`
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    fn advance_counter(&mut self, step: f64, min: f64, max: f64) -> f64 {
        let next = self.counter + step;
        self.counter = if next > max {
            min
        } else if next < min {
            max
        } else {
            next
        };
        self.counter
    }

    /// Value of the pattern `elapsed_secs` after start, before noise
    pub fn value_at(&mut self, elapsed_secs: f64) -> f64 {
        match self.pattern {
            Pattern::Constant { value } => value,
            Pattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (std::f64::consts::TAU * frequency * elapsed_secs).sin(),
            Pattern::Counter { step, min, max } => self.advance_counter(step, min, max),
            Pattern::Random { min, max } if min < max => self.rng.random_range(min..max),
            Pattern::Random { min, .. } => min,
            Pattern::Wave {
                wave,
                period,
                amplitude,
            } => amplitude * wave.at(phase(elapsed_secs, period)),
        }
    }
}

impl Sampler for PatternSampler {
    fn sample(&mut self) -> f64 {
        let value = self.value_at(self.started.elapsed().as_secs_f64());
        if self.noise_amplitude > 0.0 {
            value + self.rng.random_range(-1.0..1.0) * self.noise_amplitude
        } else {
            value
        }
    }
}
