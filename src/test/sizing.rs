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
//! Transceiver selection and spectrum assignment.

use crate::{
    config::{ChannelGrid, SimConfig},
    network::{LinkSpec, Network, NetworkError},
    signal::{ModulationFormat, Transceiver},
    units::GHZ,
};

fn transceivers() -> Vec<Transceiver> {
    vec![
        // 64 Gb/s
        Transceiver::new(0, "dp-16qam", 0.0),
        // 128 Gb/s
        Transceiver::new(0, "dp-16qam-64g", 0.0).symbol_rate(64.0 * GHZ),
        // 32 Gb/s
        Transceiver::new(0, "qpsk", 0.0).modulation(ModulationFormat::Qpsk, 2.0),
    ]
}

fn terminals(config: SimConfig) -> (Network, usize, usize) {
    let mut net = Network::new(config);
    let a = net.add_lt("a", transceivers()).unwrap();
    let b = net.add_lt("b", transceivers()).unwrap();
    let r = net.add_roadm("r").unwrap();
    net.add_link(a, r, LinkSpec::new()).unwrap();
    net.add_link(r, b, LinkSpec::new()).unwrap();
    (net, a, b)
}

#[test]
fn fewest_wavelengths_win() {
    let (net, a, _) = terminals(SimConfig::default());

    // 7, 4 and 13 wavelengths
    let alloc = net.wavelength_allocation(a, 400e9).unwrap();
    assert_eq!(alloc.transceiver, 1);
    assert_eq!(alloc.channels, vec![1, 2, 3, 4]);

    // 1 wavelength on the first two transceivers: the lowest id wins
    let alloc = net.wavelength_allocation(a, 50e9).unwrap();
    assert_eq!(alloc.transceiver, 0);
    assert_eq!(alloc.channels, vec![1]);

    // exactly one wavelength of the second transceiver
    let alloc = net.wavelength_allocation(a, 128e9).unwrap();
    assert_eq!(alloc.transceiver, 1);
    assert_eq!(alloc.channels.len(), 1);

    let lt = net.line_terminal(a).unwrap();
    for t in lt.transceivers.iter() {
        let expected = (1e12 / t.gross_bit_rate()).ceil() as usize;
        assert_eq!(t.required_wavelengths(1e12), expected);
    }
}

#[test]
fn used_channels_are_skipped() {
    let (mut net, a, b) = terminals(SimConfig::default());
    let (_, port) = net
        .find_link_and_out_port_from_nodes(a, net.node_id("r").unwrap())
        .unwrap();
    net.line_terminal_mut(a)
        .unwrap()
        .configure_terminal(0, port, [1, 3])
        .unwrap();
    let alloc = net.wavelength_allocation(a, 400e9).unwrap();
    assert_eq!(alloc.channels, vec![2, 4, 5, 6]);

    // the destination's receivers only count when a route is known
    let lt = net.line_terminal_mut(b).unwrap();
    lt.assoc_rx_to_channel(0, 2).unwrap();
    let alloc = net.wavelength_allocation(a, 400e9).unwrap();
    assert_eq!(alloc.channels, vec![2, 4, 5, 6]);
}

#[test]
fn insufficient_spectrum() {
    let config = SimConfig {
        grid: ChannelGrid {
            num_channels: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let (net, a, _) = terminals(config);
    assert_eq!(net.wavelength_allocation(a, 256e9).unwrap().channels, vec![1, 2]);
    assert_eq!(
        net.wavelength_allocation(a, 1e12),
        Err(NetworkError::InsufficientSpectrum {
            node: "a".to_string(),
            required: 8,
            available: 3
        })
    );

    let mut net = Network::new(SimConfig::default());
    let empty = net.add_lt("empty", []).unwrap();
    assert!(matches!(
        net.wavelength_allocation(empty, 1e9),
        Err(NetworkError::NoTransceiver(_))
    ));
    let r = net.add_roadm("r").unwrap();
    assert!(matches!(
        net.wavelength_allocation(r, 1e9),
        Err(NetworkError::NotALineTerminal(_))
    ));
}
