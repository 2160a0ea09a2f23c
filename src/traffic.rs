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
//! Routes, spectrum allocations and the record of an active transmission.
use serde::{Deserialize, Serialize};

use crate::{
    link::LinkId,
    node::{NodeId, PortId, RuleId},
    signal::ChannelId,
};

pub type TrafficId = usize;

/// One node of a route, with the link it is reached over (`None` for the source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteHop {
    pub node: NodeId,
    pub link: Option<LinkId>,
}

pub type Route = Vec<RouteHop>;

/// Transceiver and wavelengths chosen for a transmission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Allocation {
    pub transceiver: usize,
    pub channels: Vec<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Traffic {
    pub id: TrafficId,
    pub src: NodeId,
    pub dst: NodeId,
    /// Requested bit rate \[bit/s\]
    pub bit_rate: f64,
    pub route: Route,
    pub allocation: Allocation,
    /// Out-port of the source terminal
    pub out_port: PortId,
    pub rx_transceiver: Option<usize>,
    /// Switch rules installed for this transmission, per ROADM
    pub rules: Vec<(NodeId, RuleId)>,
}

impl Traffic {
    pub fn links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.route.iter().filter_map(|hop| hop.link)
    }
}
