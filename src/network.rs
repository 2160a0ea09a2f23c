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
//! The [`Network`] is the registry of all nodes, links and monitors, and drives propagation.
//!
//! Signals only move when something changes: a terminal turns on, a rule is installed, updated
//! or deleted, or an amplifier gain is set. Each change seeds a worklist of links that is
//! processed until no node forwards anything new.
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, VecDeque},
};

use itertools::Itertools;
use ordered_float::NotNan;
use priority_queue::PriorityQueue;
use thiserror::Error;

use crate::{
    amplifier::{Amplifier, GainRipple},
    config::{RippleConfig, SimConfig},
    link::{Link, LinkError, LinkId, PropagationMode},
    monitor::{Monitor, MonitorError, MonitorMode, MonitorTarget, MonitorView},
    node::{
        Forward, LineTerminal, Node, NodeError, NodeId, PortAttachment, PortDirection, PortId,
        Roadm, RuleId, SwitchRule,
    },
    noise_model::{QotEstimator, Simulated},
    signal::{ChannelId, Estimate, Estimates, SignalBundle, Transceiver},
    span::{FibreType, Span, SpanId},
    traffic::{Allocation, Route, RouteHop, Traffic, TrafficId},
    units::watt_to_dbm,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetworkError {
    #[error("The name {0} is already in use")]
    DuplicateName(String),
    #[error("Cannot connect {0} to itself")]
    SelfLoop(String),
    #[error("Unknown node {0}")]
    UnknownNode(String),
    #[error("Unknown link {0}")]
    UnknownLink(LinkId),
    #[error("Unknown amplifier {0}")]
    UnknownAmplifier(String),
    #[error("Unknown monitor {0}")]
    UnknownMonitor(String),
    #[error("Unknown traffic {0}")]
    UnknownTraffic(TrafficId),
    #[error("{0} is not a ROADM")]
    NotARoadm(String),
    #[error("{0} is not a line terminal")]
    NotALineTerminal(String),
    #[error("No route found from {src} to {dst}")]
    NoRouteFound { src: String, dst: String },
    #[error("Invalid route: {0}")]
    InvalidRoute(String),
    #[error("{0} has no transceiver")]
    NoTransceiver(String),
    #[error("Channels {channels:?} are already in use between {src} and {dst}")]
    ChannelsInUse {
        src: String,
        dst: String,
        channels: Vec<ChannelId>,
    },
    #[error("{node} needs {required} free channels, but only {available} are available")]
    InsufficientSpectrum {
        node: String,
        required: usize,
        available: usize,
    },
    #[error("Link {link} carries channels {channels:?} that no rule or transceiver claims")]
    OrphanedSignals {
        link: String,
        channels: Vec<ChannelId>,
    },
    #[error("Propagation did not settle after {0} link traversals")]
    PropagationLoop(usize),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Description of a link to be added with [`Network::add_link`].
#[derive(Debug, Clone, Default)]
pub struct LinkSpec {
    name: Option<String>,
    src_out_port: Option<PortId>,
    dst_in_port: Option<PortId>,
    boost_amp: Option<Amplifier>,
    spans: Vec<(Span, Option<Amplifier>)>,
    srs_effect: Option<bool>,
}

impl LinkSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn src_out_port(mut self, port: PortId) -> Self {
        self.src_out_port = Some(port);
        self
    }

    pub fn dst_in_port(mut self, port: PortId) -> Self {
        self.dst_in_port = Some(port);
        self
    }

    pub fn boost(mut self, amplifier: Amplifier) -> Self {
        self.boost_amp = Some(amplifier.boost(true));
        self
    }

    pub fn span(mut self, span: Span, amplifier: Option<Amplifier>) -> Self {
        self.spans.push((span, amplifier));
        self
    }

    pub fn srs_effect(mut self, srs_effect: bool) -> Self {
        self.srs_effect = Some(srs_effect);
        self
    }
}

/// Associations a transmission created while being established.
#[derive(Debug, Default)]
struct Claims {
    tx: Vec<ChannelId>,
    rx: Vec<ChannelId>,
}

#[derive(Debug, Clone)]
pub struct Network {
    pub config: SimConfig,
    nodes: Vec<Node>,
    name_to_node: BTreeMap<String, NodeId>,
    links: Vec<Link>,
    /// Adjacency list: node -> (neighbor, link)
    topology: BTreeMap<NodeId, Vec<(NodeId, LinkId)>>,
    names: BTreeSet<String>,
    /// Amplifiers created by [`Network::add_amplifier`] that no link holds yet
    unattached_amplifiers: BTreeSet<String>,
    monitors: BTreeMap<String, Monitor>,
    traffic: BTreeMap<TrafficId, Traffic>,
    next_traffic_id: TrafficId,
    next_span_id: SpanId,
}

impl Default for Network {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Network {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            name_to_node: BTreeMap::new(),
            links: Vec::new(),
            topology: BTreeMap::new(),
            names: BTreeSet::new(),
            unattached_amplifiers: BTreeSet::new(),
            monitors: BTreeMap::new(),
            traffic: BTreeMap::new(),
            next_traffic_id: 0,
            next_span_id: 0,
        }
    }

    fn reserve_name(&mut self, name: &str) -> Result<(), NetworkError> {
        if !self.names.insert(name.to_string()) {
            let err = NetworkError::DuplicateName(name.to_string());
            log::error!("{err}");
            Err(err)?
        }
        Ok(())
    }

    //
    // Factories
    //

    pub fn add_roadm(&mut self, name: impl Into<String>) -> Result<NodeId, NetworkError> {
        let name = name.into();
        self.reserve_name(&name)?;
        let id = self.nodes.len();
        let roadm = Roadm::new(id, name.clone(), self.config.roadm_insertion_loss_db);
        self.nodes.push(Node::Roadm(roadm));
        self.name_to_node.insert(name, id);
        Ok(id)
    }

    /// Add a line terminal with the given transceivers. A monitor `<name>-monitor` observing the
    /// received signals is added as well.
    pub fn add_lt(
        &mut self,
        name: impl Into<String>,
        transceivers: impl IntoIterator<Item = Transceiver>,
    ) -> Result<NodeId, NetworkError> {
        let name = name.into();
        let monitor = format!("{name}-monitor");
        if self.names.contains(&monitor) {
            Err(NetworkError::DuplicateName(monitor.clone()))?
        }
        self.reserve_name(&name)?;
        let id = self.nodes.len();
        let mut lt = LineTerminal::new(
            id,
            name.clone(),
            self.config.grid,
            self.config.receiver_threshold_db,
        );
        for tx in transceivers {
            lt.add_transceiver(tx);
        }
        self.nodes.push(Node::LineTerminal(lt));
        self.name_to_node.insert(name, id);
        self.add_monitor(monitor, MonitorTarget::Terminal(id), MonitorMode::In)?;
        Ok(id)
    }

    /// Create an amplifier with a unique name. The ripple profile follows the configuration.
    pub fn add_amplifier(
        &mut self,
        name: impl Into<String>,
        target_gain: f64,
    ) -> Result<Amplifier, NetworkError> {
        let name = name.into();
        if self.names.contains(&name) {
            Err(NetworkError::DuplicateName(name.clone()))?
        }
        let ripple = match self.config.gain_ripple {
            RippleConfig::Flat => GainRipple::Flat,
            RippleConfig::Seeded { seed, sigma_db } => {
                // every amplifier gets its own profile
                let seed = seed.wrapping_add(self.names.len() as u64);
                GainRipple::seeded(seed, sigma_db, self.config.grid.num_channels)
                    .map_err(|e| LinkError::Amplifier {
                        link: String::new(),
                        amplifier: name.clone(),
                        error: e,
                    })?
            }
        };
        self.reserve_name(&name)?;
        self.unattached_amplifiers.insert(name.clone());
        Ok(Amplifier::new(name, target_gain).ripple(ripple))
    }

    pub fn add_span(&mut self, fibre_type: FibreType, length_km: f64) -> Span {
        let id = self.next_span_id;
        self.next_span_id += 1;
        Span::new(id, fibre_type, length_km)
    }

    pub fn add_link(&mut self, src: NodeId, dst: NodeId, spec: LinkSpec) -> Result<LinkId, NetworkError> {
        let src_name = self.node(src)?.name().to_string();
        let dst_name = self.node(dst)?.name().to_string();
        if src == dst {
            let err = NetworkError::SelfLoop(src_name.clone());
            log::error!("{err}");
            Err(err)?
        }
        let name = spec.name.unwrap_or_else(|| format!("{src_name}-{dst_name}"));
        if self.names.contains(&name) {
            Err(NetworkError::DuplicateName(name.clone()))?
        }
        // amplifiers from `add_amplifier` hold their name already, others must not clash
        let amplifiers = spec
            .boost_amp
            .iter()
            .chain(spec.spans.iter().filter_map(|(_, amp)| amp.as_ref()))
            .map(|amp| amp.name.clone())
            .collect_vec();
        let mut seen = BTreeSet::new();
        for amp in amplifiers.iter() {
            let reserved = self.names.contains(amp) && !self.unattached_amplifiers.contains(amp);
            if reserved || *amp == name || !seen.insert(amp) {
                let err = NetworkError::DuplicateName(amp.clone());
                log::error!("{err}");
                Err(err)?
            }
        }

        let id = self.links.len();
        let src_out_port = self.nodes[src].ports_mut().attach(
            &src_name,
            PortDirection::Output,
            spec.src_out_port,
            PortAttachment { peer: dst, link: id },
        )?;
        let dst_in_port = match self.nodes[dst].ports_mut().attach(
            &dst_name,
            PortDirection::Input,
            spec.dst_in_port,
            PortAttachment { peer: src, link: id },
        ) {
            Ok(port) => port,
            Err(e) => {
                self.nodes[src].ports_mut().outputs.remove(&src_out_port);
                Err(e)?
            }
        };
        self.reserve_name(&name)?;
        for amp in amplifiers {
            if !self.unattached_amplifiers.remove(&amp) {
                self.names.insert(amp);
            }
        }

        let mut link = Link::new(id, name, (src, src_out_port), (dst, dst_in_port));
        link.boost_amp = spec.boost_amp;
        link.srs_effect = spec.srs_effect.unwrap_or(self.config.srs_effect);
        for (span, amp) in spec.spans {
            link.add_span(span, amp);
        }
        log::debug!(
            "added link {} with {} spans ({:.1} km)",
            link.name,
            link.spans.len(),
            link.length() / 1e3
        );
        self.links.push(link);
        self.topology.entry(src).or_default().push((dst, id));
        Ok(id)
    }

    pub fn add_monitor(
        &mut self,
        name: impl Into<String>,
        target: MonitorTarget,
        mode: MonitorMode,
    ) -> Result<(), NetworkError> {
        let name = name.into();
        match &target {
            MonitorTarget::Amplifier(amp) => {
                self.amplifier(amp)?;
            }
            MonitorTarget::Link(link) => {
                self.link(*link)?;
            }
            MonitorTarget::Roadm { node, port } => {
                let roadm = self.roadm(*node)?;
                let known = match mode {
                    MonitorMode::In => roadm.ports.input(*port).is_some(),
                    MonitorMode::Out => roadm.ports.output(*port).is_some(),
                };
                if !known {
                    Err(NodeError::UnknownPort {
                        node: roadm.name.clone(),
                        direction: match mode {
                            MonitorMode::In => PortDirection::Input,
                            MonitorMode::Out => PortDirection::Output,
                        },
                        port: *port,
                    })?
                }
            }
            MonitorTarget::Terminal(node) => {
                self.line_terminal(*node)?;
            }
        }
        self.reserve_name(&name)?;
        self.monitors
            .insert(name.clone(), Monitor { name, target, mode });
        Ok(())
    }

    //
    // Accessors
    //

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn monitors(&self) -> impl Iterator<Item = &Monitor> {
        self.monitors.values()
    }

    pub fn traffic(&self) -> impl Iterator<Item = &Traffic> {
        self.traffic.values()
    }

    pub fn topology(&self) -> &BTreeMap<NodeId, Vec<(NodeId, LinkId)>> {
        &self.topology
    }

    pub fn node_id(&self, name: &str) -> Result<NodeId, NetworkError> {
        self.name_to_node
            .get(name)
            .copied()
            .ok_or_else(|| NetworkError::UnknownNode(name.to_string()))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, NetworkError> {
        self.nodes
            .get(id)
            .ok_or_else(|| NetworkError::UnknownNode(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, NetworkError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| NetworkError::UnknownNode(id.to_string()))
    }

    pub fn roadm(&self, id: NodeId) -> Result<&Roadm, NetworkError> {
        let node = self.node(id)?;
        node.as_roadm()
            .ok_or_else(|| NetworkError::NotARoadm(node.name().to_string()))
    }

    pub fn roadm_mut(&mut self, id: NodeId) -> Result<&mut Roadm, NetworkError> {
        let node = self.node_mut(id)?;
        let name = node.name().to_string();
        node.as_roadm_mut().ok_or(NetworkError::NotARoadm(name))
    }

    pub fn line_terminal(&self, id: NodeId) -> Result<&LineTerminal, NetworkError> {
        let node = self.node(id)?;
        node.as_line_terminal()
            .ok_or_else(|| NetworkError::NotALineTerminal(node.name().to_string()))
    }

    pub fn line_terminal_mut(&mut self, id: NodeId) -> Result<&mut LineTerminal, NetworkError> {
        let node = self.node_mut(id)?;
        let name = node.name().to_string();
        node.as_line_terminal_mut()
            .ok_or(NetworkError::NotALineTerminal(name))
    }

    pub fn link(&self, id: LinkId) -> Result<&Link, NetworkError> {
        self.links.get(id).ok_or(NetworkError::UnknownLink(id))
    }

    pub fn link_by_name(&self, name: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.name == name)
    }

    /// Link from `src` to `dst` and the out-port of `src` it is attached to.
    pub fn find_link_and_out_port_from_nodes(&self, src: NodeId, dst: NodeId) -> Option<(LinkId, PortId)> {
        self.links
            .iter()
            .find(|l| l.src == src && l.dst == dst)
            .map(|l| (l.id, l.src_out_port))
    }

    /// Link from `src` to `dst` and the in-port of `dst` it is attached to.
    pub fn find_link_and_in_port_from_nodes(&self, src: NodeId, dst: NodeId) -> Option<(LinkId, PortId)> {
        self.links
            .iter()
            .find(|l| l.src == src && l.dst == dst)
            .map(|l| (l.id, l.dst_in_port))
    }

    /// Link carrying the amplifier `name`, and the amplifier.
    pub fn amplifier(&self, name: &str) -> Result<(LinkId, &Amplifier), NetworkError> {
        self.links
            .iter()
            .find_map(|l| l.amplifier(name).map(|a| (l.id, a)))
            .ok_or_else(|| NetworkError::UnknownAmplifier(name.to_string()))
    }

    //
    // Routing and spectrum
    //

    /// Shortest path by fiber length. Line terminals are only used as endpoints. Ties are broken
    /// by the number of hops and then by node id.
    pub fn routing(&self, src: NodeId, dst: NodeId) -> Result<Route, NetworkError> {
        self.node(src)?;
        self.node(dst)?;
        let mut dist: BTreeMap<NodeId, (NotNan<f64>, usize)> = BTreeMap::new();
        let mut prev: BTreeMap<NodeId, (NodeId, LinkId)> = BTreeMap::new();
        let mut settled = BTreeSet::new();
        let mut queue = PriorityQueue::new();
        dist.insert(src, (NotNan::default(), 0));
        queue.push(src, Reverse((NotNan::<f64>::default(), 0usize, src)));

        while let Some((u, Reverse((d, hops, _)))) = queue.pop() {
            settled.insert(u);
            if u == dst {
                break;
            }
            if u != src && self.nodes[u].is_line_terminal() {
                continue;
            }
            for (v, link) in self.topology.get(&u).into_iter().flatten() {
                if settled.contains(v) {
                    continue;
                }
                let Ok(length) = NotNan::new(self.links[*link].length()) else {
                    continue;
                };
                let candidate = (d + length, hops + 1);
                if dist.get(v).map_or(true, |old| candidate < *old) {
                    dist.insert(*v, candidate);
                    prev.insert(*v, (u, *link));
                    queue.push(*v, Reverse((candidate.0, candidate.1, *v)));
                }
            }
        }

        if !settled.contains(&dst) {
            let err = NetworkError::NoRouteFound {
                src: self.nodes[src].name().to_string(),
                dst: self.nodes[dst].name().to_string(),
            };
            log::warn!("{err}");
            return Err(err);
        }

        let mut route = vec![];
        let mut current = dst;
        while let Some((p, link)) = prev.get(&current) {
            route.push(RouteHop {
                node: current,
                link: Some(*link),
            });
            current = *p;
        }
        route.push(RouteHop {
            node: src,
            link: None,
        });
        route.reverse();
        Ok(route)
    }

    /// Pick the transceiver of `src` that needs the fewest wavelengths for `bit_rate`, and the
    /// lowest free channels for it.
    pub fn wavelength_allocation(&self, src: NodeId, bit_rate: f64) -> Result<Allocation, NetworkError> {
        self.allocate(src, bit_rate, None)
    }

    fn allocate(&self, src: NodeId, bit_rate: f64, route: Option<&Route>) -> Result<Allocation, NetworkError> {
        let lt = self.line_terminal(src)?;
        let (transceiver, required) = lt
            .transceivers
            .iter()
            .map(|t| (t.id, t.required_wavelengths(bit_rate)))
            .min_by_key(|(id, n)| (*n, *id))
            .ok_or_else(|| NetworkError::NoTransceiver(lt.name.clone()))?;

        let mut used = lt.used_channels();
        if let Some(route) = route {
            used.extend(self.channels_in_use_on(route)?);
        }
        let channels = self
            .config
            .grid
            .channels()
            .filter(|ch| !used.contains(ch))
            .take(required)
            .collect_vec();
        if channels.len() < required {
            let err = NetworkError::InsufficientSpectrum {
                node: lt.name.clone(),
                required,
                available: channels.len(),
            };
            log::error!("{err}");
            Err(err)?
        }
        Ok(Allocation {
            transceiver,
            channels,
        })
    }

    /// Channels already occupied somewhere along `route`.
    fn channels_in_use_on(&self, route: &Route) -> Result<BTreeSet<ChannelId>, NetworkError> {
        let mut used = BTreeSet::new();
        for (i, hop) in route.iter().enumerate() {
            if let Some(link) = hop.link {
                used.extend(self.link(link)?.channels());
            }
            match self.node(hop.node)? {
                Node::Roadm(roadm) => {
                    let in_port = hop.link.map(|l| self.links[l].dst_in_port);
                    let out_port = route
                        .get(i + 1)
                        .and_then(|next| next.link)
                        .map(|l| self.links[l].src_out_port);
                    for rule in roadm.switch_table.values() {
                        if Some(rule.in_port) == in_port || Some(rule.out_port) == out_port {
                            used.extend(rule.channels.iter().copied());
                        }
                    }
                }
                Node::LineTerminal(lt) if i > 0 => used.extend(lt.used_channels()),
                Node::LineTerminal(_) => {}
            }
        }
        Ok(used)
    }

    fn check_route(&self, src: NodeId, dst: NodeId, route: &Route) -> Result<(), NetworkError> {
        let (Some(first), Some(last)) = (route.first(), route.last()) else {
            return Err(NetworkError::InvalidRoute("the route is empty".into()));
        };
        if first.node != src || last.node != dst || route.len() < 2 {
            Err(NetworkError::InvalidRoute(format!(
                "the route must lead from node {src} to node {dst}"
            )))?
        }
        for (a, b) in route.iter().tuple_windows() {
            let Some(link) = b.link else {
                return Err(NetworkError::InvalidRoute(format!(
                    "node {} is reached without a link",
                    b.node
                )));
            };
            let link = self.link(link)?;
            if link.src != a.node || link.dst != b.node {
                Err(NetworkError::InvalidRoute(format!(
                    "link {} does not connect node {} to node {}",
                    link.name, a.node, b.node
                )))?
            }
        }
        Ok(())
    }

    //
    // Transmission
    //

    /// Establish a transmission of `bit_rate` from `src` to `dst` and propagate it. The route and
    /// the spectrum are computed unless given.
    pub fn transmit(
        &mut self,
        src: NodeId,
        dst: NodeId,
        bit_rate: f64,
        route: Option<Route>,
        resources: Option<Allocation>,
    ) -> Result<TrafficId, NetworkError> {
        let route = match route {
            Some(route) => route,
            None => self.routing(src, dst)?,
        };
        self.check_route(src, dst, &route)?;
        let allocation = match resources {
            Some(allocation) => {
                let mut used = self.line_terminal(src)?.used_channels();
                used.extend(self.channels_in_use_on(&route)?);
                let channels = allocation
                    .channels
                    .iter()
                    .filter(|ch| used.contains(ch))
                    .copied()
                    .collect_vec();
                if !channels.is_empty() {
                    let err = NetworkError::ChannelsInUse {
                        src: self.nodes[src].name().to_string(),
                        dst: self.nodes[dst].name().to_string(),
                        channels,
                    };
                    log::error!("{err}");
                    Err(err)?
                }
                allocation
            }
            None => self.allocate(src, bit_rate, Some(&route))?,
        };
        let Some(first_link) = route[1].link else {
            return Err(NetworkError::InvalidRoute("the first hop has no link".into()));
        };
        let out_port = self.link(first_link)?.src_out_port;

        let mut traffic = Traffic {
            id: self.next_traffic_id,
            src,
            dst,
            bit_rate,
            route,
            allocation,
            out_port,
            rx_transceiver: None,
            rules: Vec::new(),
        };
        let mut claims = Claims::default();
        if let Err(e) = self.establish(&mut traffic, &mut claims) {
            self.release(&traffic, &claims);
            return Err(e);
        }
        self.next_traffic_id += 1;
        let id = traffic.id;
        log::info!(
            "transmission {id}: {} -> {} on channels {:?} over {} hops",
            self.nodes[src].name(),
            self.nodes[dst].name(),
            traffic.allocation.channels,
            traffic.route.len() - 1
        );
        self.traffic.insert(id, traffic);
        if let Err(e) = self.start(id) {
            log::warn!("transmission {id} failed to start, withdrawing it");
            if let Some(traffic) = self.traffic.remove(&id) {
                self.withdraw(&traffic, &claims);
            }
            return Err(e);
        }
        Ok(id)
    }

    fn establish(&mut self, traffic: &mut Traffic, claims: &mut Claims) -> Result<(), NetworkError> {
        let channels = traffic.allocation.channels.clone();
        claims.tx = self.line_terminal_mut(traffic.src)?.configure_terminal(
            traffic.allocation.transceiver,
            traffic.out_port,
            channels.iter().copied(),
        )?;

        for (prev, hop, next) in traffic.route.clone().into_iter().tuple_windows() {
            let (Some(in_link), Some(out_link)) = (hop.link, next.link) else {
                continue;
            };
            let in_port = self.link(in_link)?.dst_in_port;
            let out_port = self.link(out_link)?.src_out_port;
            let roadm = self.roadm_mut(hop.node)?;
            let rule_id = roadm.next_rule_id();
            roadm.install_switch_rule(rule_id, in_port, out_port, channels.iter().copied(), Some(prev.node))?;
            traffic.rules.push((hop.node, rule_id));
        }

        let tx_rate = self
            .line_terminal(traffic.src)?
            .transceiver(traffic.allocation.transceiver)?
            .gross_bit_rate();
        let dst = self.line_terminal_mut(traffic.dst)?;
        let rx = dst
            .transceivers
            .iter()
            .find(|t| t.gross_bit_rate() == tx_rate)
            .or(dst.transceivers.first())
            .map(|t| t.id)
            .ok_or_else(|| NetworkError::NoTransceiver(dst.name.clone()))?;
        traffic.rx_transceiver = Some(rx);
        for ch in channels.iter() {
            let fresh = !dst.rx_channels.contains_key(ch);
            dst.assoc_rx_to_channel(rx, *ch)?;
            if fresh {
                claims.rx.push(*ch);
            }
        }
        Ok(())
    }

    /// Undo the associations and rules a (partially) established transmission created, without
    /// propagating.
    fn release(&mut self, traffic: &Traffic, claims: &Claims) {
        if let Ok(lt) = self.line_terminal_mut(traffic.src) {
            for ch in claims.tx.iter() {
                lt.tx_channels.remove(ch);
            }
        }
        for (node, rule) in traffic.rules.iter() {
            if let Ok(roadm) = self.roadm_mut(*node) {
                if let Err(e) = roadm.delete_switch_rule(*rule) {
                    log::warn!("cannot roll back rule {rule}: {e}");
                }
            }
        }
        if let Ok(lt) = self.line_terminal_mut(traffic.dst) {
            for ch in claims.rx.iter() {
                lt.dissoc_rx_channel(*ch);
            }
        }
    }

    /// Take the signals of a started transmission off the network, then release it.
    fn withdraw(&mut self, traffic: &Traffic, claims: &Claims) {
        let forwards = match self.line_terminal_mut(traffic.src) {
            Ok(lt) => lt.turn_off(&claims.tx).unwrap_or_else(|e| {
                log::warn!("{e}");
                Vec::new()
            }),
            Err(e) => {
                log::warn!("{e}");
                Vec::new()
            }
        };
        if let Err(e) = self.propagate_forwards(traffic.src, forwards) {
            log::warn!("cannot propagate the withdrawal of transmission {}: {e}", traffic.id);
        }
        self.release(traffic, claims);
    }

    /// Turn on the source port of a transmission and propagate.
    pub fn start(&mut self, id: TrafficId) -> Result<(), NetworkError> {
        let traffic = self.traffic.get(&id).ok_or(NetworkError::UnknownTraffic(id))?;
        let (src, out_port) = (traffic.src, traffic.out_port);
        let forwards = self.line_terminal(src)?.turn_on(&[out_port]);
        self.propagate_forwards(src, forwards)
    }

    /// Tear down a transmission: turn its channels off, remove its rules and its receivers.
    pub fn stop(&mut self, id: TrafficId) -> Result<(), NetworkError> {
        let traffic = self.traffic.remove(&id).ok_or(NetworkError::UnknownTraffic(id))?;
        let forwards = self
            .line_terminal_mut(traffic.src)?
            .turn_off(&traffic.allocation.channels)?;
        self.propagate_forwards(traffic.src, forwards)?;
        for (node, rule) in traffic.rules.iter() {
            self.delete_switch_rule(*node, *rule)?;
        }
        let dst = self.line_terminal_mut(traffic.dst)?;
        for ch in traffic.allocation.channels.iter() {
            dst.dissoc_rx_channel(*ch);
        }
        log::info!("transmission {id} stopped");
        Ok(())
    }

    /// Re-send the signals of every line terminal, e.g. after amplifier gains changed.
    pub fn turn_on_all(&mut self) -> Result<(), NetworkError> {
        let terminals = self
            .nodes
            .iter()
            .filter_map(|n| n.as_line_terminal().map(|lt| (lt.id, lt.turn_on(&[]))))
            .collect_vec();
        for (id, forwards) in terminals {
            self.propagate_forwards(id, forwards)?;
        }
        Ok(())
    }

    //
    // Switching
    //

    pub fn install_switch_rule(
        &mut self,
        roadm: NodeId,
        rule_id: RuleId,
        in_port: PortId,
        out_port: PortId,
        channels: impl IntoIterator<Item = ChannelId>,
        src_node: Option<NodeId>,
    ) -> Result<(), NetworkError> {
        let r = self.roadm_mut(roadm)?;
        r.install_switch_rule(rule_id, in_port, out_port, channels, src_node)?;
        let forwards = r.switch()?;
        self.propagate_forwards(roadm, forwards)
    }

    /// Move a rule to a new out-port and re-propagate. Returns the previous out-port.
    pub fn update_switch_rule(
        &mut self,
        roadm: NodeId,
        rule_id: RuleId,
        new_out_port: PortId,
    ) -> Result<PortId, NetworkError> {
        let r = self.roadm_mut(roadm)?;
        let old = r.update_switch_rule(rule_id, new_out_port)?;
        let channels = r
            .switch_table
            .get(&rule_id)
            .map(|rule| rule.channels.iter().copied().collect_vec())
            .unwrap_or_default();
        let forwards = r.switch()?;
        if old != new_out_port {
            self.clean_behind(roadm, old, &channels)?;
        }
        self.propagate_forwards(roadm, forwards)?;
        Ok(old)
    }

    /// Delete a rule, purge its channels from the link behind its out-port, re-propagate and
    /// verify that no signal is left without a rule or transceiver claiming it.
    pub fn delete_switch_rule(&mut self, roadm: NodeId, rule_id: RuleId) -> Result<SwitchRule, NetworkError> {
        let r = self.roadm_mut(roadm)?;
        let rule = r.delete_switch_rule(rule_id)?;
        let forwards = r.switch()?;
        let channels = rule.channels.iter().copied().collect_vec();
        self.clean_behind(roadm, rule.out_port, &channels)?;
        self.propagate_forwards(roadm, forwards)?;
        self.check_orphaned_signals()?;
        Ok(rule)
    }

    /// Remove `channels` from the link leaving `node` at `out_port` and from the input of the
    /// node at its far end.
    fn clean_behind(&mut self, node: NodeId, out_port: PortId, channels: &[ChannelId]) -> Result<(), NetworkError> {
        let Some(attachment) = self.node(node)?.ports().output(out_port).copied() else {
            return Ok(());
        };
        let link = &mut self.links[attachment.link];
        link.clean_optical_signals(channels);
        let (dst, in_port) = (link.dst, link.dst_in_port);
        self.nodes[dst].clean_input(in_port, channels);
        Ok(())
    }

    /// Fail if any link carries a channel that neither a rule (ROADM source) nor a transceiver
    /// (terminal source) sends over it.
    pub fn check_orphaned_signals(&self) -> Result<(), NetworkError> {
        for link in self.links.iter() {
            let present = link.stale_channels();
            if present.is_empty() {
                continue;
            }
            let claimed = match &self.nodes[link.src] {
                Node::Roadm(r) => r.channels_to(link.src_out_port),
                Node::LineTerminal(lt) => lt.channels_on_port(link.src_out_port),
            };
            let orphans = present.difference(&claimed).copied().collect_vec();
            if !orphans.is_empty() {
                let err = NetworkError::OrphanedSignals {
                    link: link.name.clone(),
                    channels: orphans,
                };
                log::error!("{err}");
                Err(err)?
            }
        }
        Ok(())
    }

    /// Set the output power of every channel on a ROADM port, and measure the result after the
    /// boost amplifier of the link behind it \[dBm per channel\].
    pub fn compensate_voa(
        &mut self,
        roadm: NodeId,
        out_port: PortId,
        target_dbm: f64,
    ) -> Result<BTreeMap<ChannelId, f64>, NetworkError> {
        let r = self.roadm_mut(roadm)?;
        let channels = r
            .outputs()
            .get(&out_port)
            .map(|b| b.channels().collect_vec())
            .unwrap_or_default();
        for ch in channels.iter() {
            r.configure_voa(*ch, out_port, target_dbm)?;
        }
        let forwards = r.switch()?;
        let Some(attachment) = r.ports.output(out_port).copied() else {
            return Ok(BTreeMap::new());
        };

        let sim = Simulated {
            balancing: self.config.balancing,
        };
        let qot = QotEstimator {
            monitor_policy: self.config.monitor_policy,
        };
        let link = &mut self.links[attachment.link];
        if let Some(fw) = forwards.iter().find(|f| f.out_port == out_port) {
            link.load(fw.bundle.clone());
        }
        let measured = link
            .propagate(&sim, &qot, PropagationMode::VoaCompensation)?
            .unwrap_or_else(|| link.state.simulated.input.clone())
            .into_iter()
            .map(|(ch, s)| (ch, watt_to_dbm(s.power)))
            .collect();

        self.propagate_forwards(roadm, forwards)?;
        Ok(measured)
    }

    /// Set the target gain of an amplifier and re-propagate its link.
    pub fn set_amplifier_gain(&mut self, name: &str, gain_db: f64) -> Result<(), NetworkError> {
        let (link, _) = self.amplifier(name)?;
        self.links[link].amplifier_mut(name)?.set_target_gain(gain_db);
        log::debug!("target gain of {name} set to {gain_db:.2} dB");
        self.run_worklist(VecDeque::from([link]))
    }

    /// Restore the target gain on every amplifier and re-propagate everything.
    pub fn reset_gains(&mut self) -> Result<(), NetworkError> {
        for link in self.links.iter_mut() {
            link.amplifiers_mut().for_each(|a| a.reset_gain());
        }
        let all = (0..self.links.len()).collect();
        self.run_worklist(all)
    }

    //
    // Propagation
    //

    fn propagate_forwards(&mut self, node: NodeId, forwards: Vec<Forward>) -> Result<(), NetworkError> {
        let mut queue = VecDeque::new();
        self.enqueue(node, forwards, &mut queue);
        self.run_worklist(queue)
    }

    fn enqueue(&mut self, node: NodeId, forwards: Vec<Forward>, queue: &mut VecDeque<LinkId>) {
        for Forward { out_port, bundle } in forwards {
            let Some(attachment) = self.nodes[node].ports().output(out_port).copied() else {
                log::warn!("{}: nothing attached to port {out_port}", self.nodes[node].name());
                continue;
            };
            self.links[attachment.link].load(bundle);
            if !queue.contains(&attachment.link) {
                queue.push_back(attachment.link);
            }
        }
    }

    fn run_worklist(&mut self, mut queue: VecDeque<LinkId>) -> Result<(), NetworkError> {
        let sim = Simulated {
            balancing: self.config.balancing,
        };
        let qot = QotEstimator {
            monitor_policy: self.config.monitor_policy,
        };
        let bound = self.config.max_hops * self.links.len().max(1);
        let mut steps = 0;
        while let Some(id) = queue.pop_front() {
            steps += 1;
            if steps > bound {
                let err = NetworkError::PropagationLoop(bound);
                log::error!("{err}");
                Err(err)?
            }
            let link = &mut self.links[id];
            link.propagate(&sim, &qot, PropagationMode::Full)?;
            let (dst, in_port, bundle) = (link.dst, link.dst_in_port, link.output());
            let forwards = self.nodes[dst].receive(in_port, bundle)?;
            self.enqueue(dst, forwards, &mut queue);
        }
        Ok(())
    }

    //
    // Monitoring
    //

    pub fn monitor(&self, name: &str) -> Result<MonitorView, NetworkError> {
        let monitor = self
            .monitors
            .get(name)
            .ok_or_else(|| NetworkError::UnknownMonitor(name.to_string()))?;
        let mut view = MonitorView {
            name: monitor.name.clone(),
            ..Default::default()
        };
        match &monitor.target {
            MonitorTarget::Amplifier(amp) => {
                let (link, amplifier) = self.amplifier(amp)?;
                let states = amplifier.state.map(|s| match monitor.mode {
                    MonitorMode::In => s.input.clone(),
                    MonitorMode::Out => s.output.clone(),
                });
                view.signals = self.links[link]
                    .signals
                    .iter()
                    .filter(|(ch, _)| states.simulated.contains_key(ch))
                    .map(|(ch, s)| (*ch, s.clone()))
                    .collect();
                view.states = states;
            }
            MonitorTarget::Link(link) => {
                let link = self.link(*link)?;
                view.signals = link.signals.clone();
                view.states = link.state.map(|s| match monitor.mode {
                    MonitorMode::In => s.input.clone(),
                    MonitorMode::Out => s.output.clone(),
                });
            }
            MonitorTarget::Roadm { node, port } => {
                let roadm = self.roadm(*node)?;
                let side = match monitor.mode {
                    MonitorMode::In => roadm.inputs(),
                    MonitorMode::Out => roadm.outputs(),
                };
                if let Some(bundle) = side.get(port) {
                    view.signals = bundle.signals.clone();
                    view.states = bundle.states.clone();
                }
            }
            MonitorTarget::Terminal(node) => {
                let lt = self.line_terminal(*node)?;
                let bundles = match monitor.mode {
                    MonitorMode::In => lt.received().values().cloned().collect_vec(),
                    MonitorMode::Out => lt.turn_on(&[]).into_iter().map(|f| f.bundle).collect(),
                };
                let mut merged = SignalBundle::default();
                for bundle in bundles {
                    merged.merge(bundle);
                }
                view.signals = merged.signals;
                view.states = merged.states;
            }
        }
        Ok(view)
    }

    /// Aggregate-state summary of all amplifiers: (name, realized gain per estimate) \[dB\].
    pub fn amplifier_gains(&self) -> Vec<(String, Estimates<Option<f64>>)> {
        self.links
            .iter()
            .flat_map(|l| l.amplifiers())
            .map(|a| {
                (
                    a.name.clone(),
                    Estimates::new(
                        a.realized_gain(Estimate::Simulated),
                        a.realized_gain(Estimate::Estimated),
                    ),
                )
            })
            .collect()
    }
}
