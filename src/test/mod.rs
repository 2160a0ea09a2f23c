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
//! End-to-end scenarios on small networks.
//!
//! Use the following commands to see the diffs between simulation and QoT estimate:
//!
//! ```shell
//! cargo test --release -- --nocapture --test-threads 1 --quiet
//! ```

use crate::{
    config::SimConfig,
    network::{LinkSpec, Network},
    node::{NodeId, PortId},
    signal::Transceiver,
    span::FibreType,
};

/// Print the difference of two values in dB, and panic if it exceeds `tolerance_db`.
pub fn check_diff(what: &str, exp: f64, acq: f64, tolerance_db: f64) {
    let diff = (exp - acq).abs();

    if diff <= tolerance_db {
        eprintln!(
            "{what}: diff {}{:.4} dB{} with tolerance {:.3} dB",
            termion::color::Fg(termion::color::Green),
            diff,
            termion::color::Fg(termion::color::Reset),
            tolerance_db,
        );
    } else {
        eprintln!(
            "{what}: diff {}{:.4} dB{} with tolerance {:.3} dB (expected {exp:.4}, got {acq:.4})",
            termion::color::Fg(termion::color::Red),
            diff,
            termion::color::Fg(termion::color::Reset),
            tolerance_db,
        );
        panic!()
    }
}

/// Handles of the two-ROADM network built by [`two_roadms`].
pub struct TwoRoadms {
    pub net: Network,
    pub lt1: NodeId,
    pub lt2: NodeId,
    pub r1: NodeId,
    pub r2: NodeId,
}

impl TwoRoadms {
    /// In-port and out-port of a ROADM for the link from `src` and the link towards `dst`.
    pub fn ports(&self, src: NodeId, roadm: NodeId, dst: NodeId) -> (PortId, PortId) {
        let (_, in_port) = self
            .net
            .find_link_and_in_port_from_nodes(src, roadm)
            .unwrap();
        let (_, out_port) = self
            .net
            .find_link_and_out_port_from_nodes(roadm, dst)
            .unwrap();
        (in_port, out_port)
    }
}

/// `lt1 - r1 - r2 - lt2`, where `r1 - r2` has a boost amplifier (3 dB), one span (50 km) and an
/// in-line amplifier (11 dB), in both directions.
pub fn two_roadms(config: SimConfig) -> TwoRoadms {
    let mut net = Network::new(config);
    let r1 = net.add_roadm("r1").unwrap();
    let r2 = net.add_roadm("r2").unwrap();
    let lt1 = net.add_lt("lt1", [Transceiver::new(0, "t1", 0.0)]).unwrap();
    let lt2 = net.add_lt("lt2", [Transceiver::new(0, "t2", 0.0)]).unwrap();

    for (lt, r) in [(lt1, r1), (lt2, r2)] {
        net.add_link(lt, r, LinkSpec::new()).unwrap();
        net.add_link(r, lt, LinkSpec::new()).unwrap();
    }
    for (a, b) in [(r1, r2), (r2, r1)] {
        let name = format!("{}-{}", net.node(a).unwrap().name(), net.node(b).unwrap().name());
        let boost = net.add_amplifier(format!("{name}-boost"), 3.0).unwrap();
        let span = net.add_span(FibreType::Smf, 50.0);
        let amp = net.add_amplifier(format!("{name}-amp1"), 11.0).unwrap();
        let spec = LinkSpec::new().boost(boost).span(span, Some(amp));
        net.add_link(a, b, spec).unwrap();
    }

    TwoRoadms {
        net,
        lt1,
        lt2,
        r1,
        r2,
    }
}

mod estimation;
mod sizing;
