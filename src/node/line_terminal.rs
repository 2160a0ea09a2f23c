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
//! Line terminals originate and terminate transmissions.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{Forward, NodeError, NodeId, PortDirection, PortId, Ports};
use crate::{
    config::ChannelGrid,
    signal::{ChannelId, Estimates, Signal, SignalBundle, SignalState, Transceiver},
};

/// Quality of a received channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiverReport {
    pub channel: ChannelId,
    pub transceiver: usize,
    pub osnr: f64,
    /// gOSNR in the signal bandwidth \[dB\]
    pub gosnr: f64,
    pub osnr_qot: f64,
    pub gosnr_qot: f64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineTerminal {
    pub id: NodeId,
    pub name: String,
    pub ports: Ports,
    pub transceivers: Vec<Transceiver>,
    /// Out-port each transceiver transmits on
    pub tx_ports: BTreeMap<usize, PortId>,
    pub tx_channels: BTreeMap<ChannelId, usize>,
    pub rx_channels: BTreeMap<ChannelId, usize>,
    pub receiver_threshold_db: f64,
    #[serde(skip)]
    grid: ChannelGrid,
    #[serde(skip)]
    received: BTreeMap<PortId, SignalBundle>,
    /// Latest evaluation of each in-port
    pub reports: BTreeMap<PortId, Vec<ReceiverReport>>,
}

impl LineTerminal {
    pub fn new(id: NodeId, name: impl Into<String>, grid: ChannelGrid, receiver_threshold_db: f64) -> Self {
        Self {
            id,
            name: name.into(),
            ports: Ports::default(),
            transceivers: Vec::new(),
            tx_ports: BTreeMap::new(),
            tx_channels: BTreeMap::new(),
            rx_channels: BTreeMap::new(),
            receiver_threshold_db,
            grid,
            received: BTreeMap::new(),
            reports: BTreeMap::new(),
        }
    }

    /// Add a transceiver. Returns its id.
    pub fn add_transceiver(&mut self, mut transceiver: Transceiver) -> usize {
        let id = self.transceivers.len();
        transceiver.id = id;
        self.transceivers.push(transceiver);
        id
    }

    pub fn transceiver(&self, id: usize) -> Result<&Transceiver, NodeError> {
        self.transceivers
            .get(id)
            .ok_or(NodeError::UnknownTransceiver {
                node: self.name.clone(),
                transceiver: id,
            })
    }

    /// Let `transceiver` transmit `channels` on `out_port`. Nothing changes on error. Returns the
    /// channels that were not yet assigned to the transceiver.
    ///
    /// A transceiver transmits on a single port: it can only move to another port once all of its
    /// channels are turned off.
    pub fn configure_terminal(
        &mut self,
        transceiver: usize,
        out_port: PortId,
        channels: impl IntoIterator<Item = ChannelId>,
    ) -> Result<Vec<ChannelId>, NodeError> {
        self.transceiver(transceiver)?;
        if self.ports.output(out_port).is_none() {
            Err(NodeError::UnknownPort {
                node: self.name.clone(),
                direction: PortDirection::Output,
                port: out_port,
            })?
        }
        let active = self.tx_channels.values().any(|t| *t == transceiver);
        match self.tx_ports.get(&transceiver) {
            Some(port) if active && *port != out_port => Err(NodeError::TransceiverBound {
                node: self.name.clone(),
                transceiver,
                port: *port,
            })?,
            _ => {}
        }
        let channels = channels.into_iter().collect::<BTreeSet<_>>();
        for ch in channels.iter() {
            match self.tx_channels.get(ch) {
                Some(t) if *t != transceiver => Err(NodeError::ChannelInUse {
                    node: self.name.clone(),
                    channel: *ch,
                    transceiver: *t,
                })?,
                _ => {}
            }
        }

        self.tx_ports.insert(transceiver, out_port);
        let mut added = Vec::new();
        for ch in channels {
            if self.tx_channels.insert(ch, transceiver).is_none() {
                added.push(ch);
            }
        }
        Ok(added)
    }

    fn assoc(
        node: &str,
        table: &mut BTreeMap<ChannelId, usize>,
        transceiver: usize,
        channel: ChannelId,
    ) -> Result<(), NodeError> {
        match table.get(&channel) {
            Some(t) if *t != transceiver => Err(NodeError::ChannelInUse {
                node: node.to_string(),
                channel,
                transceiver: *t,
            }),
            _ => {
                table.insert(channel, transceiver);
                Ok(())
            }
        }
    }

    pub fn assoc_tx_to_channel(&mut self, transceiver: usize, channel: ChannelId) -> Result<(), NodeError> {
        self.transceiver(transceiver)?;
        Self::assoc(&self.name, &mut self.tx_channels, transceiver, channel)
    }

    pub fn assoc_rx_to_channel(&mut self, transceiver: usize, channel: ChannelId) -> Result<(), NodeError> {
        self.transceiver(transceiver)?;
        Self::assoc(&self.name, &mut self.rx_channels, transceiver, channel)
    }

    pub fn dissoc_rx_channel(&mut self, channel: ChannelId) -> Option<usize> {
        self.rx_channels.remove(&channel)
    }

    /// Channels in use for transmission or reception.
    pub fn used_channels(&self) -> BTreeSet<ChannelId> {
        self.tx_channels
            .keys()
            .chain(self.rx_channels.keys())
            .copied()
            .collect()
    }

    /// Channels transmitted on `out_port`.
    pub fn channels_on_port(&self, out_port: PortId) -> BTreeSet<ChannelId> {
        self.tx_channels
            .iter()
            .filter(|(_, tx)| self.tx_ports.get(tx) == Some(&out_port))
            .map(|(ch, _)| *ch)
            .collect()
    }

    fn emit(&self, out_port: PortId) -> Forward {
        let mut bundle = SignalBundle::default();
        for ch in self.channels_on_port(out_port) {
            let Some(tx) = self
                .tx_channels
                .get(&ch)
                .and_then(|t| self.transceivers.get(*t))
            else {
                continue;
            };
            bundle.insert(
                Signal::new(ch, &self.grid, tx),
                Estimates::both(SignalState::launch(tx.operation_power)),
            );
        }
        Forward { out_port, bundle }
    }

    /// Start transmitting on the given ports. All configured ports when `ports` is empty.
    pub fn turn_on(&self, ports: &[PortId]) -> Vec<Forward> {
        let ports = if ports.is_empty() {
            self.tx_ports.values().copied().collect::<BTreeSet<_>>()
        } else {
            ports.iter().copied().collect()
        };
        log::info!("{}: turning on ports {ports:?}", self.name);
        ports.into_iter().map(|p| self.emit(p)).collect()
    }

    /// Stop transmitting the given channels. Returns the remaining signals of every affected port.
    pub fn turn_off(&mut self, channels: &[ChannelId]) -> Result<Vec<Forward>, NodeError> {
        let mut ports = BTreeSet::new();
        for ch in channels {
            let tx = self
                .tx_channels
                .remove(ch)
                .ok_or(NodeError::UnknownChannel {
                    node: self.name.clone(),
                    channel: *ch,
                })?;
            if let Some(port) = self.tx_ports.get(&tx) {
                ports.insert(*port);
            }
        }
        Ok(ports.into_iter().map(|p| self.emit(p)).collect())
    }

    /// Reports of the latest evaluation of every in-port, by port and channel.
    pub fn last_reports(&self) -> Vec<&ReceiverReport> {
        self.reports.values().flatten().collect()
    }

    /// Terminate the signals arriving on `in_port` and evaluate their quality.
    pub fn receiver(&mut self, in_port: PortId, bundle: SignalBundle) -> Result<(), NodeError> {
        if let Some(ch) = bundle.channels().find(|ch| !self.rx_channels.contains_key(ch)) {
            let err = NodeError::ReceiverNotConfigured {
                node: self.name.clone(),
                channel: ch,
            };
            log::error!("{err}");
            Err(err)?
        }

        let mut reports = Vec::new();
        for (ch, signal) in bundle.signals.iter() {
            let (Some(state), Some(tx)) = (bundle.state(*ch), self.rx_channels.get(ch)) else {
                continue;
            };
            let correction = signal.gosnr_penalty();
            let report = ReceiverReport {
                channel: *ch,
                transceiver: *tx,
                osnr: state.simulated.osnr(),
                gosnr: state.simulated.gosnr() - correction,
                osnr_qot: state.estimated.osnr(),
                gosnr_qot: state.estimated.gosnr() - correction,
                success: state.simulated.gosnr() - correction >= self.receiver_threshold_db,
            };
            if report.success {
                log::info!(
                    "{}: channel {ch} received with gOSNR {:.2} dB (estimated {:.2} dB)",
                    self.name,
                    report.gosnr,
                    report.gosnr_qot
                );
            } else {
                log::warn!(
                    "{}: channel {ch} below threshold with gOSNR {:.2} dB",
                    self.name,
                    report.gosnr
                );
            }
            reports.push(report);
        }
        if reports.is_empty() {
            self.reports.remove(&in_port);
        } else {
            self.reports.insert(in_port, reports);
        }

        if bundle.is_empty() {
            self.received.remove(&in_port);
        } else {
            self.received.insert(in_port, bundle);
        }
        Ok(())
    }

    pub fn clean_input(&mut self, in_port: PortId, channels: &[ChannelId]) {
        if let Some(bundle) = self.received.get_mut(&in_port) {
            for ch in channels {
                bundle.remove(*ch);
            }
        }
    }

    pub fn received(&self) -> &BTreeMap<PortId, SignalBundle> {
        &self.received
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::PortAttachment;

    fn terminal() -> LineTerminal {
        let mut lt = LineTerminal::new(0, "lt1", ChannelGrid::default(), 20.0);
        let a = PortAttachment { peer: 1, link: 0 };
        lt.ports.attach("lt1", PortDirection::Output, None, a).unwrap();
        lt.ports.attach("lt1", PortDirection::Input, None, a).unwrap();
        lt.add_transceiver(Transceiver::new(0, "t1", 0.0));
        lt.add_transceiver(Transceiver::new(0, "t2", -2.0));
        lt
    }

    #[test]
    fn test_configure_and_turn_on() {
        let mut lt = terminal();
        lt.configure_terminal(0, 0, [1, 2]).unwrap();
        assert!(matches!(
            lt.configure_terminal(1, 0, [2]),
            Err(NodeError::ChannelInUse { channel: 2, transceiver: 0, .. })
        ));
        assert!(lt.configure_terminal(5, 0, [3]).is_err());
        assert!(lt.configure_terminal(1, 3, [3]).is_err());

        let fw = lt.turn_on(&[]);
        assert_eq!(fw.len(), 1);
        assert_eq!(fw[0].bundle.channels().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(fw[0].bundle.states.simulated[&1].power, 1e-3);

        let fw = lt.turn_off(&[1]).unwrap();
        assert_eq!(fw[0].bundle.channels().collect::<Vec<_>>(), vec![2]);
        assert!(lt.turn_off(&[1]).is_err());
    }

    #[test]
    fn test_receiver_requires_association() {
        let mut lt = terminal();
        lt.configure_terminal(0, 0, [4]).unwrap();
        let bundle = lt.turn_on(&[0]).remove(0).bundle;
        assert!(matches!(
            lt.receiver(0, bundle.clone()),
            Err(NodeError::ReceiverNotConfigured { channel: 4, .. })
        ));
        lt.assoc_rx_to_channel(1, 4).unwrap();
        // no noise at all: infinite OSNR passes the threshold
        lt.receiver(0, bundle).unwrap();
        assert_eq!(lt.last_reports().len(), 1);
        assert!(lt.last_reports()[0].success);
        assert_eq!(lt.received().len(), 1);
        assert_eq!(lt.used_channels(), BTreeSet::from([4]));
    }

    #[test]
    fn test_transceiver_stays_on_its_port() {
        let mut lt = terminal();
        let a = PortAttachment { peer: 2, link: 1 };
        lt.ports.attach("lt1", PortDirection::Output, None, a).unwrap();

        assert_eq!(lt.configure_terminal(0, 0, [1, 2]).unwrap(), vec![1, 2]);
        assert_eq!(lt.configure_terminal(0, 0, [2, 3]).unwrap(), vec![3]);
        assert_eq!(
            lt.configure_terminal(0, 1, [4]),
            Err(NodeError::TransceiverBound {
                node: "lt1".to_string(),
                transceiver: 0,
                port: 0
            })
        );
        // a failed call changes nothing
        assert!(lt.configure_terminal(1, 1, [4, 2]).is_err());
        assert_eq!(lt.tx_channels.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(lt.channels_on_port(0), BTreeSet::from([1, 2, 3]));
        assert!(lt.channels_on_port(1).is_empty());

        // once silent, the transceiver may move
        lt.turn_off(&[1, 2, 3]).unwrap();
        assert_eq!(lt.configure_terminal(0, 1, [4]).unwrap(), vec![4]);
        assert_eq!(lt.channels_on_port(1), BTreeSet::from([4]));
    }

    #[test]
    fn test_reports_per_port() {
        let mut lt = terminal();
        let a = PortAttachment { peer: 2, link: 1 };
        lt.ports.attach("lt1", PortDirection::Input, None, a).unwrap();
        lt.configure_terminal(0, 0, [1, 2]).unwrap();
        let bundle = lt.turn_on(&[0]).remove(0).bundle;
        let mut first = bundle.clone();
        first.remove(2);
        let mut second = bundle;
        second.remove(1);
        lt.assoc_rx_to_channel(1, 1).unwrap();
        lt.assoc_rx_to_channel(1, 2).unwrap();

        lt.receiver(0, first).unwrap();
        lt.receiver(1, second).unwrap();
        let channels = lt.last_reports().iter().map(|r| r.channel).collect::<Vec<_>>();
        assert_eq!(channels, vec![1, 2]);

        // emptying one port keeps the reports of the other
        lt.receiver(0, SignalBundle::default()).unwrap();
        let channels = lt.last_reports().iter().map(|r| r.channel).collect::<Vec<_>>();
        assert_eq!(channels, vec![2]);
    }
}
