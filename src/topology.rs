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
//! Builders for demo and test networks.
use std::{collections::BTreeMap, error::Error};

use serde::{Deserialize, Serialize};

use crate::{
    config::SimConfig,
    network::{LinkSpec, Network},
    node::NodeId,
    signal::Transceiver,
    span::FibreType,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// ROADMs `r0 .. r{n-1}` on a line.
    Linear(usize),
    /// ROADMs `r0 .. r{n-1}` on a ring.
    Ring(usize),
}

/// Span lengths and amplifier gains of the links between ROADMs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanLayout {
    pub span_length_km: f64,
    pub spans_per_link: usize,
    pub fibre_type: FibreType,
    /// Gain of the boost amplifier of every ROADM-to-ROADM link. Compensates the ROADM loss
    /// when `None`.
    pub boost_gain_db: Option<f64>,
    /// Span lengths \[km\] for specific site pairs, in both directions.
    overrides: BTreeMap<(String, String), Vec<f64>>,
}

impl Default for SpanLayout {
    fn default() -> Self {
        Self {
            span_length_km: 80.0,
            spans_per_link: 1,
            fibre_type: FibreType::Smf,
            boost_gain_db: None,
            overrides: BTreeMap::new(),
        }
    }
}

impl SpanLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn span_length_km(mut self, km: f64) -> Self {
        self.span_length_km = km;
        self
    }

    pub fn spans_per_link(mut self, spans: usize) -> Self {
        self.spans_per_link = spans;
        self
    }

    pub fn fibre_type(mut self, fibre_type: FibreType) -> Self {
        self.fibre_type = fibre_type;
        self
    }

    pub fn boost_gain(mut self, gain_db: f64) -> Self {
        self.boost_gain_db = Some(gain_db);
        self
    }

    /// Use the given span lengths between `a` and `b`.
    pub fn overwrite(mut self, a: impl Into<String>, b: impl Into<String>, spans_km: Vec<f64>) -> Self {
        let (a, b) = (a.into(), b.into());
        let key = if a <= b { (a, b) } else { (b, a) };
        self.overrides.insert(key, spans_km);
        self
    }

    /// Span lengths \[km\] between two sites.
    pub fn spans(&self, a: &str, b: &str) -> Vec<f64> {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.overrides
            .get(&key)
            .cloned()
            .unwrap_or_else(|| vec![self.span_length_km; self.spans_per_link])
    }
}

impl Topology {
    /// print readable (and filename-compatible) string representation of the topology
    pub fn fmt(&self) -> String {
        match self {
            Self::Linear(n) => format!("Linear_{n}"),
            Self::Ring(n) => format!("Ring_{n}"),
        }
    }

    /// Site pairs connected by a pair of links.
    fn adjacencies(&self) -> Vec<(usize, usize)> {
        match self {
            Self::Linear(n) => (1..*n).map(|i| (i - 1, i)).collect(),
            Self::Ring(n) => (0..*n).map(|i| (i, (i + 1) % n)).collect(),
        }
    }

    /// Build the network. Every ROADM `r{i}` gets a line terminal `lt{i}` with one transceiver.
    pub fn build_network(&self, layout: &SpanLayout, config: &SimConfig) -> Result<Network, Box<dyn Error>> {
        let sites = match self {
            Self::Linear(n) if *n >= 1 => *n,
            Self::Ring(n) if *n >= 3 => *n,
            _ => {
                let msg = format!("Cannot build a {} topology", self.fmt());
                log::error!("{msg}");
                Err(msg)?
            }
        };

        let mut net = Network::new(config.clone());
        let mut roadms: Vec<NodeId> = Vec::with_capacity(sites);
        for i in 0..sites {
            let roadm = net.add_roadm(format!("r{i}"))?;
            let tx = Transceiver::new(0, format!("lt{i}-tx"), config.default_launch_power_dbm);
            let lt = net.add_lt(format!("lt{i}"), [tx])?;
            net.add_link(lt, roadm, LinkSpec::new())?;
            net.add_link(roadm, lt, LinkSpec::new())?;
            roadms.push(roadm);
        }

        for (a, b) in self.adjacencies() {
            add_fiber_link(&mut net, layout, roadms[a], roadms[b])?;
            add_fiber_link(&mut net, layout, roadms[b], roadms[a])?;
        }
        log::info!(
            "built {} with {} nodes and {} links",
            self.fmt(),
            net.nodes().len(),
            net.links().len()
        );
        Ok(net)
    }
}

/// Add a link from `src` to `dst` with a boost amplifier and an in-line amplifier after every
/// span, each compensating the loss in front of it.
fn add_fiber_link(net: &mut Network, layout: &SpanLayout, src: NodeId, dst: NodeId) -> Result<(), Box<dyn Error>> {
    let src_name = net.node(src)?.name().to_string();
    let dst_name = net.node(dst)?.name().to_string();
    let prefix = format!("{src_name}-{dst_name}");

    let boost_gain = layout
        .boost_gain_db
        .unwrap_or(net.config.roadm_insertion_loss_db);
    let boost = net.add_amplifier(format!("{prefix}-boost"), boost_gain)?;
    let mut spec = LinkSpec::new().boost(boost);
    for (k, km) in layout.spans(&src_name, &dst_name).into_iter().enumerate() {
        let span = net.add_span(layout.fibre_type, km);
        let amp = net.add_amplifier(format!("{prefix}-amp{}", k + 1), span.loss_db)?;
        spec = spec.span(span, Some(amp));
    }
    net.add_link(src, dst, spec)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_linear() {
        let layout = SpanLayout::new().span_length_km(50.0).spans_per_link(2);
        let net = Topology::Linear(3)
            .build_network(&layout, &SimConfig::default())
            .unwrap();
        assert_eq!(net.nodes().len(), 6);
        // 2 per terminal, 2 per adjacency
        assert_eq!(net.links().len(), 10);
        let link = net.link_by_name("r0-r1").unwrap();
        assert_eq!(link.spans.len(), 2);
        assert!((link.length() - 100e3).abs() < 1e-6);
        assert!(net.amplifier("r1-r0-amp2").is_ok());
        assert!(net.link_by_name("r0-r2").is_none());
    }

    #[test]
    fn test_ring_and_overrides() {
        let layout = SpanLayout::new().overwrite("r2", "r0", vec![30.0, 40.0, 50.0]);
        assert_eq!(layout.spans("r0", "r2"), vec![30.0, 40.0, 50.0]);
        assert_eq!(layout.spans("r0", "r1"), vec![80.0]);
        let net = Topology::Ring(3)
            .build_network(&layout, &SimConfig::default())
            .unwrap();
        assert_eq!(net.links().len(), 12);
        assert_eq!(net.link_by_name("r2-r0").unwrap().spans.len(), 3);
        assert_eq!(net.link_by_name("r0-r2").unwrap().spans.len(), 3);
        assert!(Topology::Ring(2)
            .build_network(&layout, &SimConfig::default())
            .is_err());
    }

    #[test]
    fn test_fmt() {
        assert_eq!(Topology::Linear(4).fmt(), "Linear_4");
        assert_eq!(Topology::Ring(5).fmt(), "Ring_5");
    }
}
