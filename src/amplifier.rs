// qotsim: Physical-Layer Simulation of Optical Networks with Quality-of-Transmission Estimation
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! EDFA model.
//!
//! An [`Amplifier`] amplifies every present signal by its system gain plus a wavelength-dependent
//! ripple, adds ASE noise and scales the accumulated NLI. Because the realized gain depends on
//! the aggregate input, the system gain is first balanced against the target gain in a bounded
//! fixed-point loop ([`Amplifier::balance_power_excursions`]).
use std::{collections::BTreeMap, fmt, sync::Arc};

use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::BalancingConfig,
    physics::amplified_spontaneous_emission,
    signal::{ChannelId, ChannelStates, Estimate, Estimates, Signal, SignalMap, SignalState},
    units::{abs_to_db, db_to_abs, GHZ},
};

pub const DEFAULT_TARGET_GAIN: f64 = 17.6;
pub const DEFAULT_NOISE_FIGURE: f64 = 5.5;
pub const DEFAULT_BANDWIDTH: f64 = 12.5 * GHZ;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AmplifierError {
    #[error("Gain balancing of amplifier {amplifier} did not converge within {iterations} iterations")]
    GainBalancingDidNotConverge { amplifier: String, iterations: usize },
    #[error("Invalid gain ripple: {0}")]
    InvalidRipple(String),
}

/// External model predicting the wavelength-dependent gain of an amplifier.
pub trait GainRipplePredictor: Send + Sync {
    /// Ripple in dB for each of the given channels, in the same order.
    fn predict(&self, channels: &[ChannelId]) -> Vec<f64>;
}

#[derive(Clone, Default)]
pub enum GainRipple {
    #[default]
    Flat,
    /// Ripple in dB, indexed by `channel - 1`.
    Profile(Vec<f64>),
    /// Ripple predicted for the current channel load. The last prediction is cached.
    Predicted {
        predictor: Arc<dyn GainRipplePredictor>,
        cache: BTreeMap<ChannelId, f64>,
    },
}

impl fmt::Debug for GainRipple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => write!(f, "Flat"),
            Self::Profile(p) => f.debug_tuple("Profile").field(&p.len()).finish(),
            Self::Predicted { cache, .. } => f.debug_struct("Predicted").field("cache", cache).finish(),
        }
    }
}

impl GainRipple {
    /// Random ripple profile, reproducible for a fixed seed.
    pub fn seeded(seed: u64, sigma_db: f64, num_channels: usize) -> Result<Self, AmplifierError> {
        let normal = Normal::new(0.0, sigma_db)
            .map_err(|e| AmplifierError::InvalidRipple(e.to_string()))?;
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(Self::Profile(
            (0..num_channels).map(|_| normal.sample(&mut rng)).collect(),
        ))
    }

    pub fn predicted(predictor: Arc<dyn GainRipplePredictor>) -> Self {
        Self::Predicted {
            predictor,
            cache: BTreeMap::new(),
        }
    }

    /// Ripple of a channel in dB. Unknown channels have no ripple.
    pub fn get(&self, index: ChannelId) -> f64 {
        match self {
            Self::Flat => 0.0,
            Self::Profile(p) => index
                .checked_sub(1)
                .and_then(|i| p.get(i))
                .copied()
                .unwrap_or(0.0),
            Self::Predicted { cache, .. } => cache.get(&index).copied().unwrap_or(0.0),
        }
    }

    fn refresh(&mut self, channels: &[ChannelId]) {
        if let Self::Predicted { predictor, cache } = self {
            let prediction = predictor.predict(channels);
            *cache = channels.iter().copied().zip(prediction).collect();
        }
    }
}

/// Signals entering and leaving an amplifier in one estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AmplifierState {
    pub input: ChannelStates,
    pub output: ChannelStates,
}

#[derive(Debug, Clone)]
pub struct Amplifier {
    pub name: String,
    /// \[dB\]
    pub target_gain: f64,
    /// Gain actually applied, adjusted by power balancing \[dB\]
    pub system_gain: f64,
    /// \[dB\]
    pub noise_figure: f64,
    /// Per-channel noise figure overrides \[dB\]
    pub noise_figure_profile: BTreeMap<ChannelId, f64>,
    /// Noise bandwidth \[Hz\]
    pub bandwidth: f64,
    pub boost: bool,
    pub ripple: GainRipple,
    pub state: Estimates<AmplifierState>,
    power_excursions_flag_1: bool,
    power_excursions_flag_2: bool,
}

impl Amplifier {
    pub fn new(name: impl Into<String>, target_gain: f64) -> Self {
        Self {
            name: name.into(),
            target_gain,
            system_gain: target_gain,
            noise_figure: DEFAULT_NOISE_FIGURE,
            noise_figure_profile: BTreeMap::new(),
            bandwidth: DEFAULT_BANDWIDTH,
            boost: false,
            ripple: GainRipple::Flat,
            state: Estimates::default(),
            power_excursions_flag_1: false,
            power_excursions_flag_2: false,
        }
    }

    pub fn noise_figure(mut self, noise_figure: f64) -> Self {
        self.noise_figure = noise_figure;
        self
    }

    pub fn noise_figure_profile(mut self, profile: BTreeMap<ChannelId, f64>) -> Self {
        self.noise_figure_profile = profile;
        self
    }

    pub fn bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn ripple(mut self, ripple: GainRipple) -> Self {
        self.ripple = ripple;
        self
    }

    pub fn boost(mut self, boost: bool) -> Self {
        self.boost = boost;
        self
    }

    /// Set a new target gain. The system gain follows immediately.
    pub fn set_target_gain(&mut self, target_gain: f64) {
        self.target_gain = target_gain;
        self.system_gain = target_gain;
    }

    pub fn reset_gain(&mut self) {
        self.system_gain = self.target_gain;
    }

    pub fn get_wavelength_dependent_gain(&self, index: ChannelId) -> f64 {
        self.ripple.get(index)
    }

    pub fn noise_figure_at(&self, index: ChannelId) -> f64 {
        self.noise_figure_profile
            .get(&index)
            .copied()
            .unwrap_or(self.noise_figure)
    }

    fn amplified_power(&self, signal: &Signal, input_power: f64) -> f64 {
        input_power
            * db_to_abs(self.system_gain)
            * db_to_abs(self.get_wavelength_dependent_gain(signal.index))
    }

    /// Amplify a single signal. With `p_exc` set, the result is tentative and not recorded.
    pub fn output_amplified_power(&mut self, signal: &Signal, input_power: f64, p_exc: bool) -> f64 {
        let output_power = self.amplified_power(signal, input_power);
        if !p_exc {
            self.record(Estimate::Simulated, signal.index).power = output_power;
        }
        output_power
    }

    /// Amplify the accumulated ASE noise of a signal and add the noise of this stage.
    pub fn stage_amplified_spontaneous_emission_noise(
        &mut self,
        signal: &Signal,
        accumulated_noise: f64,
    ) -> f64 {
        let ase = amplified_spontaneous_emission(
            accumulated_noise,
            db_to_abs(self.system_gain),
            self.noise_figure_at(signal.index),
            signal.frequency,
            self.bandwidth,
        );
        self.record(Estimate::Simulated, signal.index).ase_noise = ase;
        ase
    }

    /// The accumulated NLI noise experiences the same gain as the signal.
    pub fn nli_compensation(&mut self, signal: &Signal, accumulated_nli_noise: f64) -> f64 {
        let nli = accumulated_nli_noise
            * db_to_abs(self.system_gain)
            * db_to_abs(self.get_wavelength_dependent_gain(signal.index));
        self.record(Estimate::Simulated, signal.index).nli_noise = nli;
        nli
    }

    fn record(&mut self, estimate: Estimate, ch: ChannelId) -> &mut SignalState {
        self.state.get_mut(estimate).output.entry(ch).or_default()
    }

    /// Replace the recorded state of `estimate` with a fresh pass over `input`.
    fn begin_pass(&mut self, estimate: Estimate, input: &ChannelStates) {
        let state = self.state.get_mut(estimate);
        state.input = input.clone();
        state.output.clear();
    }

    /// Evaluate the flags of the balancing loop for the current iteration.
    fn compute_power_excursions(&mut self, excursion: f64, last_step: Option<f64>, tolerance: f64) {
        self.power_excursions_flag_1 = excursion.abs() < tolerance;
        self.power_excursions_flag_2 = last_step.is_some_and(|step| step.abs() < tolerance);
    }

    fn power_excursions_flags_off(&mut self) {
        self.power_excursions_flag_1 = false;
        self.power_excursions_flag_2 = false;
    }

    /// Adjust the system gain until the aggregate gain over all present signals matches the
    /// target gain. Returns the number of iterations.
    pub fn balance_power_excursions(
        &mut self,
        signals: &SignalMap,
        input: &ChannelStates,
        config: &BalancingConfig,
    ) -> Result<usize, AmplifierError> {
        let present = input
            .iter()
            .filter_map(|(ch, state)| signals.get(ch).map(|signal| (signal, state.power)))
            .collect::<Vec<_>>();
        let total_input: f64 = present.iter().map(|(_, p)| p).sum();
        if present.is_empty() || total_input <= 0.0 {
            return Ok(0);
        }

        let mut last_step = None;
        for iteration in 1..=config.max_iterations {
            let total_output: f64 = present
                .iter()
                .map(|(signal, power)| self.amplified_power(signal, *power))
                .sum();
            let excursion = self.target_gain - abs_to_db(total_output / total_input);
            self.compute_power_excursions(excursion, last_step, config.tolerance_db);
            log::trace!(
                "{} balancing iteration {iteration}: system gain {:.4} dB, excursion {excursion:.6} dB",
                self.name,
                self.system_gain
            );
            if self.power_excursions_flag_1 && self.power_excursions_flag_2 {
                self.power_excursions_flags_off();
                return Ok(iteration);
            }
            self.system_gain += excursion;
            last_step = Some(excursion);
        }

        self.power_excursions_flags_off();
        let msg = format!(
            "{} did not converge within {} iterations",
            self.name, config.max_iterations
        );
        log::error!("{msg}");
        Err(AmplifierError::GainBalancingDidNotConverge {
            amplifier: self.name.clone(),
            iterations: config.max_iterations,
        })
    }

    /// Full simulated pass: balance, amplify, add ASE and scale NLI of every present signal.
    pub fn amplify(
        &mut self,
        signals: &SignalMap,
        input: &ChannelStates,
        config: &BalancingConfig,
    ) -> Result<ChannelStates, AmplifierError> {
        let channels = input.keys().copied().collect::<Vec<_>>();
        self.ripple.refresh(&channels);
        self.balance_power_excursions(signals, input, config)?;
        self.begin_pass(Estimate::Simulated, input);

        let mut output = ChannelStates::new();
        for (ch, state) in input {
            let Some(signal) = signals.get(ch) else {
                continue;
            };
            let power = self.output_amplified_power(signal, state.power, false);
            let ase_noise = self.stage_amplified_spontaneous_emission_noise(signal, state.ase_noise);
            let nli_noise = self.nli_compensation(signal, state.nli_noise);
            output.insert(
                *ch,
                SignalState {
                    power,
                    ase_noise,
                    nli_noise,
                },
            );
        }
        Ok(output)
    }

    /// Estimated pass: flat target gain, no ripple and no balancing.
    pub fn amplify_estimated(&mut self, signals: &SignalMap, input: &ChannelStates) -> ChannelStates {
        self.begin_pass(Estimate::Estimated, input);
        let gain = db_to_abs(self.target_gain);
        let mut output = ChannelStates::new();
        for (ch, state) in input {
            let Some(signal) = signals.get(ch) else {
                continue;
            };
            let out = SignalState {
                power: state.power * gain,
                ase_noise: amplified_spontaneous_emission(
                    state.ase_noise,
                    gain,
                    self.noise_figure_at(*ch),
                    signal.frequency,
                    self.bandwidth,
                ),
                nli_noise: state.nli_noise * gain,
            };
            *self.record(Estimate::Estimated, *ch) = out;
            output.insert(*ch, out);
        }
        output
    }

    /// Realized aggregate gain of the last pass \[dB\], if any signal was present.
    pub fn realized_gain(&self, estimate: Estimate) -> Option<f64> {
        let state = self.state.get(estimate);
        let input: f64 = state.input.values().map(|s| s.power).sum();
        let output: f64 = state.output.values().map(|s| s.power).sum();
        (input > 0.0 && output > 0.0).then(|| abs_to_db(output / input))
    }

    /// Input and output of the last pass carry the same channels.
    pub fn is_consistent(&self, estimate: Estimate) -> bool {
        let state = self.state.get(estimate);
        state.input.keys().eq(state.output.keys())
    }

    /// Channels known to the amplifier in any estimate.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        let sim = &self.state.simulated;
        let est = &self.state.estimated;
        sim.input
            .keys()
            .chain(sim.output.keys())
            .chain(est.input.keys())
            .chain(est.output.keys())
            .copied()
    }

    /// Forget every trace of the given channels.
    pub fn clean_optical_signals(&mut self, channels: &[ChannelId]) {
        for state in [&mut self.state.simulated, &mut self.state.estimated] {
            for ch in channels {
                state.input.remove(ch);
                state.output.remove(ch);
            }
        }
    }
}
