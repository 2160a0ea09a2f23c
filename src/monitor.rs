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
//! Read-only probes. A [`Monitor`] only names a location. Every query resolves it into a fresh
//! [`MonitorView`] (see `Network::monitor`), so nothing is cached between queries.
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use thiserror::Error;

use crate::{
    link::LinkId,
    node::{NodeId, PortId},
    signal::{
        ChannelId, ChannelStates, Estimate, Estimates, ModulationFormat, Signal, SignalMap, SignalState,
    },
    units::watt_to_dbm,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Monitor {monitor} does not observe channel {channel}")]
    UnknownChannel { monitor: String, channel: ChannelId },
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Deserialize,
    Serialize,
    strum::Display,
    strum_macros::EnumString,
)]
pub enum MonitorMode {
    #[default]
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "out")]
    Out,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum MonitorTarget {
    Amplifier(String),
    Link(LinkId),
    Roadm { node: NodeId, port: PortId },
    Terminal(NodeId),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Monitor {
    pub name: String,
    pub target: MonitorTarget,
    pub mode: MonitorMode,
}

/// Snapshot of the signals at a monitored location.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorView {
    pub name: String,
    pub signals: SignalMap,
    pub states: Estimates<ChannelStates>,
}

impl MonitorView {
    /// Observed channels in ascending order.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.states.simulated.keys().copied().collect()
    }

    pub fn state(&self, estimate: Estimate, channel: ChannelId) -> Result<&SignalState, MonitorError> {
        self.states
            .get(estimate)
            .get(&channel)
            .ok_or(MonitorError::UnknownChannel {
                monitor: self.name.clone(),
                channel,
            })
    }

    fn list(&self, estimate: Estimate, f: impl Fn(ChannelId, &SignalState) -> f64) -> Vec<(ChannelId, f64)> {
        self.states
            .get(estimate)
            .iter()
            .map(|(ch, s)| (*ch, f(*ch, s)))
            .collect()
    }

    /// gOSNR of a state, less the bandwidth penalty of the channel's symbol rate.
    fn gosnr(&self, channel: ChannelId, state: &SignalState) -> f64 {
        let penalty = self
            .signals
            .get(&channel)
            .map(Signal::gosnr_penalty)
            .unwrap_or_default();
        state.gosnr() - penalty
    }

    pub fn get_osnr(&self, channel: ChannelId) -> Result<f64, MonitorError> {
        Ok(self.state(Estimate::Simulated, channel)?.osnr())
    }

    pub fn get_gosnr(&self, channel: ChannelId) -> Result<f64, MonitorError> {
        Ok(self.gosnr(channel, self.state(Estimate::Simulated, channel)?))
    }

    pub fn get_osnr_qot(&self, channel: ChannelId) -> Result<f64, MonitorError> {
        Ok(self.state(Estimate::Estimated, channel)?.osnr())
    }

    pub fn get_gosnr_qot(&self, channel: ChannelId) -> Result<f64, MonitorError> {
        Ok(self.gosnr(channel, self.state(Estimate::Estimated, channel)?))
    }

    /// OSNR of every channel, sorted by channel index.
    pub fn get_list_osnr(&self) -> Vec<(ChannelId, f64)> {
        self.list(Estimate::Simulated, |_, s| s.osnr())
    }

    pub fn get_list_gosnr(&self) -> Vec<(ChannelId, f64)> {
        self.list(Estimate::Simulated, |ch, s| self.gosnr(ch, s))
    }

    pub fn get_list_osnr_qot(&self) -> Vec<(ChannelId, f64)> {
        self.list(Estimate::Estimated, |_, s| s.osnr())
    }

    pub fn get_list_gosnr_qot(&self) -> Vec<(ChannelId, f64)> {
        self.list(Estimate::Estimated, |ch, s| self.gosnr(ch, s))
    }

    /// Signal power \[dBm\]
    pub fn get_power(&self, estimate: Estimate, channel: ChannelId) -> Result<f64, MonitorError> {
        Ok(watt_to_dbm(self.state(estimate, channel)?.power))
    }

    /// Accumulated ASE noise \[dBm\]
    pub fn get_ase(&self, estimate: Estimate, channel: ChannelId) -> Result<f64, MonitorError> {
        Ok(watt_to_dbm(self.state(estimate, channel)?.ase_noise))
    }

    /// Accumulated NLI noise \[dBm\]
    pub fn get_nli(&self, estimate: Estimate, channel: ChannelId) -> Result<f64, MonitorError> {
        Ok(watt_to_dbm(self.state(estimate, channel)?.nli_noise))
    }

    /// Bit error ratio of the simulated signal, from its gOSNR and modulation format.
    pub fn get_ber(&self, channel: ChannelId) -> Result<f64, MonitorError> {
        let gosnr = self.state(Estimate::Simulated, channel)?.gosnr_linear();
        let modulation = self
            .signals
            .get(&channel)
            .map(|s| s.modulation)
            .unwrap_or_default();
        Ok(bit_error_ratio(modulation, gosnr))
    }
}

/// BER for a linear SNR.
pub fn bit_error_ratio(modulation: ModulationFormat, snr: f64) -> f64 {
    match modulation {
        ModulationFormat::Bpsk => 0.5 * erfc(snr.sqrt()),
        ModulationFormat::Qpsk => 0.5 * erfc((snr / 2.0).sqrt()),
        ModulationFormat::Psk8 => (2.0 / 3.0) * erfc((3.0 * snr / 14.0).sqrt()),
        ModulationFormat::Qam16 => (3.0 / 8.0) * erfc((snr / 10.0).sqrt()),
    }
}
