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
//! Reconfigurable optical add-drop multiplexer.
//!
//! The switch table maps `(in_port, channel)` to at most one out-port. Installing a rule that
//! would make this relation ambiguous fails, as does reusing a rule id.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{Forward, NodeError, NodeId, PortDirection, PortId, Ports};
use crate::{
    signal::{ChannelId, Estimates, SignalBundle, SignalState},
    units::{db_to_abs, dbm_to_watt},
};

pub type RuleId = usize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchRule {
    pub in_port: PortId,
    pub out_port: PortId,
    pub channels: BTreeSet<ChannelId>,
    pub src_node: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Roadm {
    pub id: NodeId,
    pub name: String,
    pub ports: Ports,
    /// Attenuation of every channel passing through \[dB\]
    pub insertion_loss_db: f64,
    pub switch_table: BTreeMap<RuleId, SwitchRule>,
    /// Output power targets per `(out_port, channel)` \[dBm\]
    #[serde(with = "qotsim_utils::serde::tuple_map")]
    pub voa_targets: BTreeMap<(PortId, ChannelId), f64>,
    #[serde(skip)]
    inputs: BTreeMap<PortId, SignalBundle>,
    #[serde(skip)]
    outputs: BTreeMap<PortId, SignalBundle>,
}

impl Roadm {
    pub fn new(id: NodeId, name: impl Into<String>, insertion_loss_db: f64) -> Self {
        Self {
            id,
            name: name.into(),
            ports: Ports::default(),
            insertion_loss_db,
            switch_table: BTreeMap::new(),
            voa_targets: BTreeMap::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    fn check_port(&self, direction: PortDirection, port: PortId) -> Result<(), NodeError> {
        let known = match direction {
            PortDirection::Input => self.ports.input(port).is_some(),
            PortDirection::Output => self.ports.output(port).is_some(),
        };
        if known {
            Ok(())
        } else {
            Err(NodeError::UnknownPort {
                node: self.name.clone(),
                direction,
                port,
            })
        }
    }

    /// Rule switching `channel` arriving on `in_port`.
    pub fn lookup(&self, in_port: PortId, channel: ChannelId) -> Option<(RuleId, &SwitchRule)> {
        self.switch_table
            .iter()
            .find(|(_, r)| r.in_port == in_port && r.channels.contains(&channel))
            .map(|(id, r)| (*id, r))
    }

    /// Lowest rule id not in use.
    pub fn next_rule_id(&self) -> RuleId {
        (0..)
            .find(|id| !self.switch_table.contains_key(id))
            .unwrap_or_default()
    }

    pub fn install_switch_rule(
        &mut self,
        rule_id: RuleId,
        in_port: PortId,
        out_port: PortId,
        channels: impl IntoIterator<Item = ChannelId>,
        src_node: Option<NodeId>,
    ) -> Result<(), NodeError> {
        if self.switch_table.contains_key(&rule_id) {
            Err(NodeError::DuplicateRule {
                roadm: self.name.clone(),
                rule: rule_id,
            })?
        }
        self.check_port(PortDirection::Input, in_port)?;
        self.check_port(PortDirection::Output, out_port)?;
        let channels = channels.into_iter().collect::<BTreeSet<_>>();
        if let Some((existing, channel)) = channels
            .iter()
            .find_map(|ch| self.lookup(in_port, *ch).map(|(id, _)| (id, *ch)))
        {
            let err = NodeError::AmbiguousRule {
                roadm: self.name.clone(),
                in_port,
                channel,
                existing,
            };
            log::error!("{err}");
            Err(err)?
        }
        log::debug!(
            "{}: rule {rule_id} switches {channels:?} from port {in_port} to port {out_port}",
            self.name
        );
        self.switch_table.insert(
            rule_id,
            SwitchRule {
                in_port,
                out_port,
                channels,
                src_node,
            },
        );
        if let Some(err) = self.find_collision() {
            self.switch_table.remove(&rule_id);
            log::error!("{err}");
            Err(err)?
        }
        Ok(())
    }

    /// Change the out-port of a rule. Returns the previous out-port.
    pub fn update_switch_rule(&mut self, rule_id: RuleId, new_out_port: PortId) -> Result<PortId, NodeError> {
        self.check_port(PortDirection::Output, new_out_port)?;
        let name = self.name.clone();
        let rule = self
            .switch_table
            .get_mut(&rule_id)
            .ok_or(NodeError::UnknownRule {
                roadm: name,
                rule: rule_id,
            })?;
        let old = std::mem::replace(&mut rule.out_port, new_out_port);
        if let Some(err) = self.find_collision() {
            if let Some(rule) = self.switch_table.get_mut(&rule_id) {
                rule.out_port = old;
            }
            log::error!("{err}");
            Err(err)?
        }
        log::debug!("{}: rule {rule_id} moved from port {old} to port {new_out_port}", self.name);
        Ok(old)
    }

    pub fn delete_switch_rule(&mut self, rule_id: RuleId) -> Result<SwitchRule, NodeError> {
        let rule = self
            .switch_table
            .remove(&rule_id)
            .ok_or(NodeError::UnknownRule {
                roadm: self.name.clone(),
                rule: rule_id,
            })?;
        log::debug!("{}: deleted rule {rule_id}", self.name);
        Ok(rule)
    }

    /// Set the output power of `channel` on `out_port`, applied from the next switching pass on.
    pub fn configure_voa(
        &mut self,
        channel: ChannelId,
        out_port: PortId,
        operational_power_dbm: f64,
    ) -> Result<(), NodeError> {
        self.check_port(PortDirection::Output, out_port)?;
        self.voa_targets
            .insert((out_port, channel), operational_power_dbm);
        Ok(())
    }

    fn equalize(&self, out_port: PortId, channel: ChannelId, state: &mut Estimates<SignalState>) {
        let target = self.voa_targets.get(&(out_port, channel)).copied();
        for s in [&mut state.simulated, &mut state.estimated] {
            let factor = match target {
                Some(dbm) if s.power > 0.0 => dbm_to_watt(dbm) / s.power,
                _ => db_to_abs(-self.insertion_loss_db),
            };
            s.scale(factor);
        }
    }

    /// First `(out_port, channel)` that the stored inputs would be switched to twice.
    fn find_collision(&self) -> Option<NodeError> {
        let mut taken = BTreeSet::new();
        for (in_port, bundle) in self.inputs.iter() {
            for ch in bundle.channels() {
                let Some((_, rule)) = self.lookup(*in_port, ch) else {
                    continue;
                };
                if !taken.insert((rule.out_port, ch)) {
                    return Some(NodeError::ChannelCollision {
                        roadm: self.name.clone(),
                        out_port: rule.out_port,
                        channel: ch,
                    });
                }
            }
        }
        None
    }

    /// Store the signals arriving on `in_port` and recompute the outputs. Signals that would
    /// collide with those of another in-port are rejected, keeping the previous input.
    pub fn receive(&mut self, in_port: PortId, bundle: SignalBundle) -> Result<Vec<Forward>, NodeError> {
        self.check_port(PortDirection::Input, in_port)?;
        let previous = if bundle.is_empty() {
            self.inputs.remove(&in_port)
        } else {
            self.inputs.insert(in_port, bundle)
        };
        if let Some(err) = self.find_collision() {
            match previous {
                Some(bundle) => self.inputs.insert(in_port, bundle),
                None => self.inputs.remove(&in_port),
            };
            log::error!("{err}");
            Err(err)?
        }
        self.switch()
    }

    /// Recompute every output port from the stored inputs. Returns the ports whose content
    /// changed, including ports that became empty.
    pub fn switch(&mut self) -> Result<Vec<Forward>, NodeError> {
        let mut new_outputs: BTreeMap<PortId, SignalBundle> = BTreeMap::new();
        for (in_port, bundle) in self.inputs.iter() {
            for (ch, signal) in bundle.signals.iter() {
                let Some((_, rule)) = self.lookup(*in_port, *ch) else {
                    log::warn!("{}: no switch rule for channel {ch} on port {in_port}", self.name);
                    continue;
                };
                let Some(mut state) = bundle.state(*ch) else {
                    continue;
                };
                let out = new_outputs.entry(rule.out_port).or_default();
                if out.signals.contains_key(ch) {
                    let err = NodeError::ChannelCollision {
                        roadm: self.name.clone(),
                        out_port: rule.out_port,
                        channel: *ch,
                    };
                    log::error!("{err}");
                    Err(err)?
                }
                self.equalize(rule.out_port, *ch, &mut state);
                out.insert(signal.clone(), state);
            }
        }

        let ports = self
            .outputs
            .keys()
            .chain(new_outputs.keys())
            .copied()
            .collect::<BTreeSet<_>>();
        let mut forwards = Vec::new();
        for out_port in ports {
            let bundle = new_outputs.remove(&out_port).unwrap_or_default();
            if self.outputs.get(&out_port) == Some(&bundle) {
                continue;
            }
            if bundle.is_empty() {
                self.outputs.remove(&out_port);
            } else {
                self.outputs.insert(out_port, bundle.clone());
            }
            forwards.push(Forward { out_port, bundle });
        }
        Ok(forwards)
    }

    pub fn clean_input(&mut self, in_port: PortId, channels: &[ChannelId]) {
        if let Some(bundle) = self.inputs.get_mut(&in_port) {
            for ch in channels {
                bundle.remove(*ch);
            }
            if bundle.is_empty() {
                self.inputs.remove(&in_port);
            }
        }
    }

    pub fn inputs(&self) -> &BTreeMap<PortId, SignalBundle> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<PortId, SignalBundle> {
        &self.outputs
    }

    /// Channels a rule switches to `out_port`, from any in-port.
    pub fn channels_to(&self, out_port: PortId) -> BTreeSet<ChannelId> {
        self.switch_table
            .values()
            .filter(|r| r.out_port == out_port)
            .flat_map(|r| r.channels.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::ChannelGrid,
        node::PortAttachment,
        signal::{Signal, Transceiver},
        units::watt_to_dbm,
    };

    fn roadm() -> Roadm {
        let mut r = Roadm::new(0, "r1", 17.0);
        let a = PortAttachment { peer: 1, link: 0 };
        for _ in 0..3 {
            r.ports.attach("r1", PortDirection::Input, None, a).unwrap();
            r.ports.attach("r1", PortDirection::Output, None, a).unwrap();
        }
        r
    }

    fn bundle(indices: &[ChannelId], dbm: f64) -> SignalBundle {
        let grid = ChannelGrid::default();
        let tx = Transceiver::new(0, "tx", dbm);
        let mut bundle = SignalBundle::default();
        for i in indices {
            bundle.insert(
                Signal::new(*i, &grid, &tx),
                Estimates::both(SignalState::launch(dbm_to_watt(dbm))),
            );
        }
        bundle
    }

    #[test]
    fn test_partial_function() {
        let mut r = roadm();
        r.install_switch_rule(1, 0, 1, [1, 2, 3], None).unwrap();
        r.install_switch_rule(2, 0, 2, [4, 5], None).unwrap();
        // same ports, disjoint channels
        r.install_switch_rule(3, 0, 1, [6], None).unwrap();
        // other in-port may reuse the channel
        r.install_switch_rule(4, 1, 2, [1], None).unwrap();
        assert_eq!(
            r.install_switch_rule(5, 0, 2, [3, 7], None),
            Err(NodeError::AmbiguousRule {
                roadm: "r1".to_string(),
                in_port: 0,
                channel: 3,
                existing: 1
            })
        );
        assert!(matches!(
            r.install_switch_rule(1, 2, 0, [9], None),
            Err(NodeError::DuplicateRule { rule: 1, .. })
        ));
        assert!(matches!(
            r.install_switch_rule(6, 7, 0, [9], None),
            Err(NodeError::UnknownPort { port: 7, .. })
        ));

        for in_port in 0..3 {
            for ch in 1..=10 {
                let matching = r
                    .switch_table
                    .values()
                    .filter(|rule| rule.in_port == in_port && rule.channels.contains(&ch))
                    .count();
                assert!(matching <= 1);
            }
        }
        assert_eq!(r.lookup(0, 6).map(|(id, _)| id), Some(3));
        assert_eq!(r.next_rule_id(), 0);
    }

    #[test]
    fn test_switching_and_update() {
        let mut r = roadm();
        r.install_switch_rule(0, 0, 1, [1, 2], Some(7)).unwrap();
        let fw = r.receive(0, bundle(&[1, 2, 3], 0.0)).unwrap();
        assert_eq!(fw.len(), 1);
        assert_eq!(fw[0].out_port, 1);
        assert_eq!(fw[0].bundle.channels().collect::<Vec<_>>(), vec![1, 2]);
        let p = fw[0].bundle.states.simulated[&1].power;
        assert!((watt_to_dbm(p) + 17.0).abs() < 1e-9);

        // unchanged input yields nothing to forward
        assert!(r.receive(0, bundle(&[1, 2, 3], 0.0)).unwrap().is_empty());

        assert_eq!(r.update_switch_rule(0, 2), Ok(1));
        let fw = r.switch().unwrap();
        assert_eq!(fw.len(), 2);
        assert!(fw.iter().any(|f| f.out_port == 1 && f.bundle.is_empty()));
        assert!(fw.iter().any(|f| f.out_port == 2 && f.bundle.len() == 2));
        assert!(r.outputs().get(&1).is_none());
    }

    #[test]
    fn test_collision() {
        let mut r = roadm();
        r.install_switch_rule(0, 0, 2, [1], None).unwrap();
        r.install_switch_rule(1, 1, 2, [1], None).unwrap();
        r.receive(0, bundle(&[1], 0.0)).unwrap();
        assert!(matches!(
            r.receive(1, bundle(&[1], 0.0)),
            Err(NodeError::ChannelCollision { channel: 1, .. })
        ));
        // the rejected input is not kept
        assert_eq!(r.inputs().keys().copied().collect::<Vec<_>>(), vec![0]);
        assert!(r.switch().unwrap().is_empty());
        assert!(r.receive(1, bundle(&[2], 0.0)).is_ok());
    }

    #[test]
    fn test_colliding_rule_is_not_kept() {
        let mut r = roadm();
        r.install_switch_rule(0, 0, 2, [1], None).unwrap();
        r.receive(0, bundle(&[1], 0.0)).unwrap();
        r.receive(1, bundle(&[1], 0.0)).unwrap();

        assert!(matches!(
            r.install_switch_rule(1, 1, 2, [1], None),
            Err(NodeError::ChannelCollision { out_port: 2, channel: 1, .. })
        ));
        assert_eq!(r.switch_table.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert!(r.switch().is_ok());

        r.install_switch_rule(1, 1, 1, [1], None).unwrap();
        assert!(matches!(
            r.update_switch_rule(1, 2),
            Err(NodeError::ChannelCollision { out_port: 2, channel: 1, .. })
        ));
        assert_eq!(r.switch_table[&1].out_port, 1);
        assert_eq!(r.switch().unwrap().len(), 1);
        assert_eq!(r.update_switch_rule(1, 0), Ok(1));
    }

    #[test]
    fn test_voa() {
        let mut r = roadm();
        r.install_switch_rule(0, 0, 1, [1, 2], None).unwrap();
        r.configure_voa(2, 1, -3.0).unwrap();
        assert!(r.configure_voa(2, 9, -3.0).is_err());
        let fw = r.receive(0, bundle(&[1, 2], 2.0)).unwrap();
        let states = &fw[0].bundle.states;
        assert!((watt_to_dbm(states.simulated[&1].power) + 15.0).abs() < 1e-9);
        assert!((watt_to_dbm(states.simulated[&2].power) + 3.0).abs() < 1e-9);
        assert!((watt_to_dbm(states.estimated[&2].power) + 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_delete_rule() {
        let mut r = roadm();
        r.install_switch_rule(0, 0, 1, [1], None).unwrap();
        r.receive(0, bundle(&[1], 0.0)).unwrap();
        let rule = r.delete_switch_rule(0).unwrap();
        assert_eq!(rule.channels, BTreeSet::from([1]));
        assert!(r.delete_switch_rule(0).is_err());
        let fw = r.switch().unwrap();
        assert_eq!(fw, vec![Forward { out_port: 1, bundle: SignalBundle::default() }]);
        assert!(r.channels_to(1).is_empty());
    }
}
