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
//! Signals, their per-location state and the transceivers that originate them.
//!
//! A [`Signal`] is the immutable identity of a WDM channel. Everything that changes along the
//! path (power, ASE noise and NLI noise) is kept separately as a [`SignalState`], once for the
//! simulated and once for the estimated quality of transmission (see [`Estimates`]).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    config::ChannelGrid,
    units::{abs_to_db, dbm_to_watt, GHZ, REFERENCE_BANDWIDTH, SPEED_OF_LIGHT},
};

/// Channel index on the WDM grid (1-based).
pub type ChannelId = usize;

/// Per-channel state at a location.
pub type ChannelStates = BTreeMap<ChannelId, SignalState>;

/// Signal identities present at a location.
pub type SignalMap = BTreeMap<ChannelId, Signal>;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
pub enum ModulationFormat {
    #[strum(serialize = "BPSK")]
    Bpsk,
    #[strum(serialize = "QPSK")]
    Qpsk,
    #[strum(serialize = "8PSK")]
    Psk8,
    #[default]
    #[strum(serialize = "16QAM")]
    Qam16,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Signal {
    pub index: ChannelId,
    /// Center frequency \[Hz\]
    pub frequency: f64,
    /// Center wavelength \[m\]
    pub wavelength: f64,
    /// Symbol rate \[Baud\]
    pub symbol_rate: f64,
    pub bits_per_symbol: f64,
    pub modulation: ModulationFormat,
}

impl Signal {
    pub fn new(index: ChannelId, grid: &ChannelGrid, transceiver: &Transceiver) -> Self {
        let frequency = grid.frequency(index);
        Self {
            index,
            frequency,
            wavelength: SPEED_OF_LIGHT / frequency,
            symbol_rate: transceiver.symbol_rate,
            bits_per_symbol: transceiver.bits_per_symbol,
            modulation: transceiver.modulation,
        }
    }

    /// Amount subtracted from a gOSNR in dB: the ratio of the 12.5 GHz reference bandwidth to
    /// the symbol rate.
    pub fn gosnr_penalty(&self) -> f64 {
        REFERENCE_BANDWIDTH / self.symbol_rate
    }
}

/// Power and accumulated noise of a signal at a location, all in \[W\].
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct SignalState {
    pub power: f64,
    pub ase_noise: f64,
    pub nli_noise: f64,
}

impl SignalState {
    pub fn launch(power: f64) -> Self {
        Self {
            power,
            ..Default::default()
        }
    }

    /// Multiply power and both noise accumulators by the same linear factor.
    pub fn scale(&mut self, factor: f64) {
        self.power *= factor;
        self.ase_noise *= factor;
        self.nli_noise *= factor;
    }

    pub fn scaled(mut self, factor: f64) -> Self {
        self.scale(factor);
        self
    }

    /// OSNR in dB.
    pub fn osnr(&self) -> f64 {
        abs_to_db(self.power / self.ase_noise)
    }

    /// Generalized OSNR in dB, penalized by the nonlinear interference.
    pub fn gosnr(&self) -> f64 {
        abs_to_db(self.power / (self.ase_noise + self.nli_noise))
    }

    /// Generalized OSNR in linear scale.
    pub fn gosnr_linear(&self) -> f64 {
        self.power / (self.ase_noise + self.nli_noise)
    }
}

/// Selects one of the two parallel computations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum Estimate {
    /// The physical simulation, including gain ripple and power balancing.
    Simulated,
    /// The analytical quality-of-transmission estimate.
    Estimated,
}

/// A value that exists once for the simulation and once for the QoT estimate.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Estimates<T> {
    pub simulated: T,
    pub estimated: T,
}

impl<T> Estimates<T> {
    pub fn new(simulated: T, estimated: T) -> Self {
        Self {
            simulated,
            estimated,
        }
    }

    pub fn get(&self, estimate: Estimate) -> &T {
        match estimate {
            Estimate::Simulated => &self.simulated,
            Estimate::Estimated => &self.estimated,
        }
    }

    pub fn get_mut(&mut self, estimate: Estimate) -> &mut T {
        match estimate {
            Estimate::Simulated => &mut self.simulated,
            Estimate::Estimated => &mut self.estimated,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Estimates<U> {
        Estimates {
            simulated: f(&self.simulated),
            estimated: f(&self.estimated),
        }
    }
}

impl<T: Clone> Estimates<T> {
    pub fn both(value: T) -> Self {
        Self {
            simulated: value.clone(),
            estimated: value,
        }
    }
}

/// The set of signals travelling together over a fiber, with their state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SignalBundle {
    pub signals: SignalMap,
    pub states: Estimates<ChannelStates>,
}

impl SignalBundle {
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.signals.keys().copied()
    }

    /// Add a single signal with its state in both estimates.
    pub fn insert(&mut self, signal: Signal, state: Estimates<SignalState>) {
        let ch = signal.index;
        self.signals.insert(ch, signal);
        self.states.simulated.insert(ch, state.simulated);
        self.states.estimated.insert(ch, state.estimated);
    }

    pub fn remove(&mut self, ch: ChannelId) -> Option<Signal> {
        self.states.simulated.remove(&ch);
        self.states.estimated.remove(&ch);
        self.signals.remove(&ch)
    }

    pub fn state(&self, ch: ChannelId) -> Option<Estimates<SignalState>> {
        Some(Estimates::new(
            *self.states.simulated.get(&ch)?,
            *self.states.estimated.get(&ch)?,
        ))
    }

    /// Merge another bundle into this one. Returns the channels present in both.
    pub fn merge(&mut self, other: SignalBundle) -> Vec<ChannelId> {
        let mut collisions = Vec::new();
        for (ch, signal) in other.signals {
            if self.signals.contains_key(&ch) {
                collisions.push(ch);
                continue;
            }
            if let (Some(sim), Some(est)) = (
                other.states.simulated.get(&ch),
                other.states.estimated.get(&ch),
            ) {
                self.insert(signal, Estimates::new(*sim, *est));
            }
        }
        collisions
    }
}

/// Coherent transceiver of a line terminal.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Transceiver {
    pub id: usize,
    pub name: String,
    /// Launch power \[W\]
    pub operation_power: f64,
    /// \[Baud\]
    pub symbol_rate: f64,
    pub bits_per_symbol: f64,
    pub modulation: ModulationFormat,
}

impl Transceiver {
    pub fn new(id: usize, name: impl Into<String>, launch_power_dbm: f64) -> Self {
        Self {
            id,
            name: name.into(),
            operation_power: dbm_to_watt(launch_power_dbm),
            symbol_rate: 32.0 * GHZ,
            bits_per_symbol: 4.0,
            modulation: ModulationFormat::Qam16,
        }
    }

    pub fn symbol_rate(mut self, symbol_rate: f64) -> Self {
        self.symbol_rate = symbol_rate;
        self
    }

    pub fn modulation(mut self, modulation: ModulationFormat, bits_per_symbol: f64) -> Self {
        self.modulation = modulation;
        self.bits_per_symbol = bits_per_symbol;
        self
    }

    /// Line rate of a single wavelength \[bit/s\]: `symbol_rate·log2(bits_per_symbol)`.
    pub fn gross_bit_rate(&self) -> f64 {
        self.symbol_rate * self.bits_per_symbol.log2()
    }

    /// Number of wavelengths required to carry `bit_rate`.
    pub fn required_wavelengths(&self, bit_rate: f64) -> usize {
        (bit_rate / self.gross_bit_rate()).ceil().max(1.0) as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gosnr_below_osnr() {
        let state = SignalState {
            power: 1e-3,
            ase_noise: 1e-6,
            nli_noise: 1e-7,
        };
        assert!((state.osnr() - 30.0).abs() < 1e-9);
        assert!(state.gosnr() < state.osnr());
        let scaled = state.scaled(0.5);
        assert!((scaled.osnr() - state.osnr()).abs() < 1e-9);
    }

    #[test]
    fn test_required_wavelengths() {
        let tx = Transceiver::new(0, "tx", 0.0);
        assert_eq!(tx.gross_bit_rate(), 64e9);
        assert_eq!(tx.required_wavelengths(64e9), 1);
        assert_eq!(tx.required_wavelengths(100e9), 2);
        assert_eq!(tx.required_wavelengths(200e9), 4);
        assert_eq!(tx.required_wavelengths(0.0), 1);

        let grid = ChannelGrid::default();
        let signal = Signal::new(1, &grid, &tx.symbol_rate(50.0 * GHZ));
        assert!((signal.gosnr_penalty() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_bundle_merge() {
        let grid = ChannelGrid::default();
        let tx = Transceiver::new(0, "tx", 0.0);
        let mut a = SignalBundle::default();
        a.insert(Signal::new(1, &grid, &tx), Estimates::both(SignalState::launch(1e-3)));
        let mut b = SignalBundle::default();
        b.insert(Signal::new(1, &grid, &tx), Estimates::both(SignalState::launch(1e-3)));
        b.insert(Signal::new(2, &grid, &tx), Estimates::both(SignalState::launch(1e-3)));
        assert_eq!(a.merge(b), vec![1]);
        assert_eq!(a.channels().collect::<Vec<_>>(), vec![1, 2]);
        assert!(a.remove(1).is_some());
        assert_eq!(a.len(), 1);
        assert!(a.state(1).is_none());
    }
}
