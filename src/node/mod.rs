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
//! Addressable network elements.
//!
//! A [`Node`] is either a [`LineTerminal`] or a [`Roadm`]. Both expose ports to which links
//! attach, and both accept signals arriving on an input port through [`Node::receive`], which
//! returns the signals the node forwards in turn.
use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::{
    link::LinkId,
    signal::{ChannelId, SignalBundle},
};

mod line_terminal;
mod roadm;

pub use line_terminal::{LineTerminal, ReceiverReport};
pub use roadm::{Roadm, RuleId, SwitchRule};

pub type NodeId = usize;
pub type PortId = usize;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    #[error("{node} has no {direction} port {port}")]
    UnknownPort {
        node: String,
        direction: PortDirection,
        port: PortId,
    },
    #[error("{node}: {direction} port {port} is already in use")]
    PortInUse {
        node: String,
        direction: PortDirection,
        port: PortId,
    },
    #[error("{roadm}: switch rule {rule} already exists")]
    DuplicateRule { roadm: String, rule: RuleId },
    #[error("{roadm}: channel {channel} on in-port {in_port} is already switched by rule {existing}")]
    AmbiguousRule {
        roadm: String,
        in_port: PortId,
        channel: ChannelId,
        existing: RuleId,
    },
    #[error("{roadm}: no switch rule {rule}")]
    UnknownRule { roadm: String, rule: RuleId },
    #[error("{roadm}: channel {channel} reaches out-port {out_port} from more than one in-port")]
    ChannelCollision {
        roadm: String,
        out_port: PortId,
        channel: ChannelId,
    },
    #[error("{node}: no transceiver {transceiver}")]
    UnknownTransceiver { node: String, transceiver: usize },
    #[error("{node}: channel {channel} is already assigned to transceiver {transceiver}")]
    ChannelInUse {
        node: String,
        channel: ChannelId,
        transceiver: usize,
    },
    #[error("{node}: transceiver {transceiver} still transmits on out-port {port}")]
    TransceiverBound {
        node: String,
        transceiver: usize,
        port: PortId,
    },
    #[error("{node}: channel {channel} is not assigned to any transceiver")]
    UnknownChannel { node: String, channel: ChannelId },
    #[error("{node}: received channel {channel} without a configured receiver")]
    ReceiverNotConfigured { node: String, channel: ChannelId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum PortDirection {
    #[strum(serialize = "input")]
    Input,
    #[strum(serialize = "output")]
    Output,
}

/// Peer and link behind a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortAttachment {
    pub peer: NodeId,
    pub link: LinkId,
}

/// Input and output ports of a node, allocated incrementally as links attach.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Ports {
    pub inputs: BTreeMap<PortId, PortAttachment>,
    pub outputs: BTreeMap<PortId, PortAttachment>,
}

impl Ports {
    fn side(&mut self, direction: PortDirection) -> &mut BTreeMap<PortId, PortAttachment> {
        match direction {
            PortDirection::Input => &mut self.inputs,
            PortDirection::Output => &mut self.outputs,
        }
    }

    /// Next port that would be allocated.
    pub fn next_port(&self, direction: PortDirection) -> PortId {
        let side = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };
        side.keys().next_back().map(|p| p + 1).unwrap_or(0)
    }

    /// Attach a link, either at the requested port or at the next free one.
    pub fn attach(
        &mut self,
        node: &str,
        direction: PortDirection,
        port: Option<PortId>,
        attachment: PortAttachment,
    ) -> Result<PortId, NodeError> {
        let port = port.unwrap_or_else(|| self.next_port(direction));
        let side = self.side(direction);
        if side.contains_key(&port) {
            Err(NodeError::PortInUse {
                node: node.to_string(),
                direction,
                port,
            })?
        }
        side.insert(port, attachment);
        Ok(port)
    }

    pub fn output(&self, port: PortId) -> Option<&PortAttachment> {
        self.outputs.get(&port)
    }

    pub fn input(&self, port: PortId) -> Option<&PortAttachment> {
        self.inputs.get(&port)
    }

    /// Output port leading to `peer`, if any.
    pub fn output_towards(&self, peer: NodeId) -> Option<(PortId, LinkId)> {
        self.outputs
            .iter()
            .find(|(_, a)| a.peer == peer)
            .map(|(p, a)| (*p, a.link))
    }
}

/// Signals a node emits on one of its output ports.
#[derive(Debug, Clone, PartialEq)]
pub struct Forward {
    pub out_port: PortId,
    pub bundle: SignalBundle,
}

#[derive(Debug, Clone)]
pub enum Node {
    LineTerminal(LineTerminal),
    Roadm(Roadm),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::LineTerminal(lt) => &lt.name,
            Self::Roadm(r) => &r.name,
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            Self::LineTerminal(lt) => lt.id,
            Self::Roadm(r) => r.id,
        }
    }

    pub fn ports(&self) -> &Ports {
        match self {
            Self::LineTerminal(lt) => &lt.ports,
            Self::Roadm(r) => &r.ports,
        }
    }

    pub fn ports_mut(&mut self) -> &mut Ports {
        match self {
            Self::LineTerminal(lt) => &mut lt.ports,
            Self::Roadm(r) => &mut r.ports,
        }
    }

    pub fn is_line_terminal(&self) -> bool {
        matches!(self, Self::LineTerminal(_))
    }

    pub fn as_line_terminal(&self) -> Option<&LineTerminal> {
        match self {
            Self::LineTerminal(lt) => Some(lt),
            Self::Roadm(_) => None,
        }
    }

    pub fn as_line_terminal_mut(&mut self) -> Option<&mut LineTerminal> {
        match self {
            Self::LineTerminal(lt) => Some(lt),
            Self::Roadm(_) => None,
        }
    }

    pub fn as_roadm(&self) -> Option<&Roadm> {
        match self {
            Self::Roadm(r) => Some(r),
            Self::LineTerminal(_) => None,
        }
    }

    pub fn as_roadm_mut(&mut self) -> Option<&mut Roadm> {
        match self {
            Self::Roadm(r) => Some(r),
            Self::LineTerminal(_) => None,
        }
    }

    /// Accept the signals arriving on `in_port`. Returns what the node forwards.
    pub fn receive(&mut self, in_port: PortId, bundle: SignalBundle) -> Result<Vec<Forward>, NodeError> {
        match self {
            Self::LineTerminal(lt) => {
                lt.receiver(in_port, bundle)?;
                Ok(Vec::new())
            }
            Self::Roadm(r) => r.receive(in_port, bundle),
        }
    }

    /// Forget the given channels arriving on `in_port`.
    pub fn clean_input(&mut self, in_port: PortId, channels: &[ChannelId]) {
        match self {
            Self::LineTerminal(lt) => lt.clean_input(in_port, channels),
            Self::Roadm(r) => r.clean_input(in_port, channels),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_port_allocation() {
        let mut ports = Ports::default();
        let a = PortAttachment { peer: 1, link: 0 };
        assert_eq!(ports.attach("r", PortDirection::Output, None, a), Ok(0));
        assert_eq!(ports.attach("r", PortDirection::Output, None, a), Ok(1));
        assert_eq!(ports.attach("r", PortDirection::Output, Some(5), a), Ok(5));
        assert_eq!(ports.attach("r", PortDirection::Output, None, a), Ok(6));
        assert_eq!(ports.attach("r", PortDirection::Input, None, a), Ok(0));
        assert!(matches!(
            ports.attach("r", PortDirection::Output, Some(1), a),
            Err(NodeError::PortInUse { port: 1, .. })
        ));
        assert_eq!(ports.output_towards(1), Some((0, 0)));
        assert_eq!(ports.output_towards(2), None);
    }
}
