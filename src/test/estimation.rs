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
//! Simulation against QoT estimate, amplifier balancing and propagation bounds.

use super::{check_diff, two_roadms};
use crate::{
    amplifier::AmplifierError,
    config::{BalancingConfig, MonitorPolicy, RippleConfig, SimConfig},
    link::LinkError,
    network::NetworkError,
    signal::Estimate,
    topology::{SpanLayout, Topology},
};

fn rippled(monitor_policy: Option<MonitorPolicy>) -> SimConfig {
    SimConfig {
        gain_ripple: RippleConfig::Seeded {
            seed: 42,
            sigma_db: 1.0,
        },
        monitor_policy,
        ..Default::default()
    }
}

fn load_line(config: SimConfig, channels: usize) -> crate::network::Network {
    let layout = SpanLayout::new().span_length_km(60.0).spans_per_link(3);
    let mut net = Topology::Linear(2).build_network(&layout, &config).unwrap();
    let lt0 = net.node_id("lt0").unwrap();
    let lt1 = net.node_id("lt1").unwrap();
    for _ in 0..channels {
        net.transmit(lt0, lt1, 64e9, None, None).unwrap();
    }
    net
}

#[test]
fn balanced_gain_matches_target() {
    let net = load_line(rippled(None), 6);
    for link in net.links() {
        for amp in link.amplifiers() {
            let Some(gain) = amp.realized_gain(Estimate::Simulated) else {
                continue;
            };
            check_diff(&amp.name, amp.target_gain, gain, 0.01);
            let estimated = amp.realized_gain(Estimate::Estimated).unwrap();
            check_diff(&amp.name, amp.target_gain, estimated, 1e-9);
            assert!(amp.is_consistent(Estimate::Simulated));
        }
    }
}

#[test]
fn monitor_overrides_estimated_nli() {
    let with_monitor = load_line(rippled(Some(MonitorPolicy { unit: 1 })), 4);
    let link = with_monitor.link_by_name("r0-r1").unwrap();
    for (sim, est) in link
        .state
        .simulated
        .spans
        .iter()
        .zip(link.state.estimated.spans.iter())
    {
        for (ch, s) in sim.launched.iter() {
            assert_eq!(est.launched[ch].nli_noise, s.nli_noise);
        }
    }

    let without = load_line(rippled(None), 4);
    let link = without.link_by_name("r0-r1").unwrap();
    let last = link.state.simulated.spans.len() - 1;
    let differs = link.state.simulated.spans[last]
        .launched
        .iter()
        .any(|(ch, s)| link.state.estimated.spans[last].launched[ch].nli_noise != s.nli_noise);
    assert!(differs);
}

#[test]
fn estimate_tracks_simulation_without_ripple() {
    let net = load_line(SimConfig::default(), 3);
    let view = net.monitor("lt1-monitor").unwrap();
    for ((ch, sim), (_, est)) in view.get_list_gosnr().into_iter().zip(view.get_list_gosnr_qot()) {
        check_diff(&format!("gOSNR of channel {ch}"), sim, est, 0.1);
    }
    for ((_, sim), (_, est)) in view.get_list_osnr().into_iter().zip(view.get_list_osnr_qot()) {
        assert!(sim.is_finite() && est.is_finite());
    }
}

#[test]
fn balancing_cap_is_reported() {
    let config = SimConfig {
        balancing: BalancingConfig {
            max_iterations: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut t = two_roadms(config);
    let err = t.net.transmit(t.lt1, t.lt2, 64e9, None, None).unwrap_err();
    assert!(matches!(
        err,
        NetworkError::Link(LinkError::Amplifier {
            error: AmplifierError::GainBalancingDidNotConverge { iterations: 1, .. },
            ..
        })
    ));

    // the transmission is withdrawn entirely
    assert_eq!(t.net.traffic().count(), 0);
    for r in [t.r1, t.r2] {
        assert!(t.net.roadm(r).unwrap().switch_table.is_empty());
    }
    assert!(t.net.line_terminal(t.lt1).unwrap().tx_channels.is_empty());
    assert!(t.net.line_terminal(t.lt2).unwrap().rx_channels.is_empty());
}

#[test]
fn propagation_is_bounded() {
    let config = SimConfig {
        max_hops: 0,
        ..Default::default()
    };
    let mut t = two_roadms(config);
    assert!(matches!(
        t.net.transmit(t.lt1, t.lt2, 64e9, None, None),
        Err(NetworkError::PropagationLoop(0))
    ));
}

#[test]
fn amplifier_gain_changes_propagate() {
    let mut t = two_roadms(SimConfig::default());
    t.net.transmit(t.lt1, t.lt2, 64e9, None, None).unwrap();
    let before = t.net.monitor("lt2-monitor").unwrap();
    let p0 = before.get_power(Estimate::Simulated, 1).unwrap();

    t.net.set_amplifier_gain("r1-r2-amp1", 13.0).unwrap();
    let after = t.net.monitor("lt2-monitor").unwrap();
    check_diff("gain step", p0 + 2.0, after.get_power(Estimate::Simulated, 1).unwrap(), 0.01);
    check_diff("gain step (QoT)", p0 + 2.0, after.get_power(Estimate::Estimated, 1).unwrap(), 0.01);

    t.net.reset_gains().unwrap();
    let reset = t.net.monitor("lt2-monitor").unwrap();
    check_diff("reset", p0 + 2.0, reset.get_power(Estimate::Simulated, 1).unwrap(), 0.01);
    assert!(matches!(
        t.net.set_amplifier_gain("nope", 1.0),
        Err(NetworkError::UnknownAmplifier(_))
    ));
}

#[test]
fn voa_compensation_sets_boost_input() {
    let mut t = two_roadms(SimConfig::default());
    t.net.transmit(t.lt1, t.lt2, 64e9, None, None).unwrap();
    let (_, out_port) = t.net.find_link_and_out_port_from_nodes(t.r1, t.r2).unwrap();
    let measured = t.net.compensate_voa(t.r1, out_port, -10.0).unwrap();
    assert_eq!(measured.keys().copied().collect::<Vec<_>>(), vec![1]);
    // -10 dBm at the ROADM output, +3 dB boost
    check_diff("boost output", -7.0, measured[&1], 0.01);

    // the new power reaches the receiver: -7 - 11 + 11 - 17 dBm
    let view = t.net.monitor("lt2-monitor").unwrap();
    check_diff("receiver", -24.0, view.get_power(Estimate::Simulated, 1).unwrap(), 0.01);
}
