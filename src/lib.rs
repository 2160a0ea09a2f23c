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
//! Library for simulating the physical layer of optical networks.
//!
//! Signals are launched by line terminals, switched by ROADMs and carried over links made of
//! fiber spans and amplifiers. Every link computes two estimates of the signal quality: a full
//! simulation with gain balancing and wavelength-dependent gain, and a QoT estimate with flat
//! gain that can be periodically corrected from the simulation.

pub mod amplifier;
pub mod config;
pub mod control;
pub mod link;
pub mod monitor;
pub mod network;
pub mod node;
pub mod noise_model;
pub mod physics;
pub mod signal;
pub mod span;
pub mod topology;
pub mod traffic;
pub mod units;
pub mod util;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        amplifier::Amplifier,
        config::SimConfig,
        control::Handler,
        monitor::{MonitorMode, MonitorTarget},
        network::{LinkSpec, Network, NetworkError},
        signal::{ChannelId, Estimate, Transceiver},
        span::FibreType,
        topology::{SpanLayout, Topology},
    };
}
