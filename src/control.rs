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
//! Control surface: maps handler names to operations on a [`Network`].
//!
//! Requests and responses are JSON values. The handler names are the ones used by the REST
//! front-end, e.g. `restConnectHandler`.
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    network::{Network, NetworkError},
    node::{Node, PortId, RuleId},
    signal::ChannelId,
    traffic::TrafficId,
};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Unknown handler {0}")]
    UnknownHandler(String),
    #[error("Invalid request for {handler}: {source}")]
    InvalidRequest {
        handler: Handler,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, strum_macros::EnumString,
)]
pub enum Handler {
    #[strum(serialize = "restNodesHandler")]
    Nodes,
    #[strum(serialize = "restLinksHandler")]
    Links,
    #[strum(serialize = "restPortsHandler")]
    Ports,
    #[strum(serialize = "restRulesHandler")]
    Rules,
    #[strum(serialize = "restMonitorHandler")]
    Monitor,
    #[strum(serialize = "restConnectHandler")]
    Connect,
    #[strum(serialize = "restDisconnectHandler")]
    Disconnect,
    #[strum(serialize = "restResetHandler")]
    Reset,
    #[strum(serialize = "restSetGainHandler")]
    SetGain,
}

#[derive(Debug, Deserialize)]
struct NodeRequest {
    node: String,
}

#[derive(Debug, Deserialize)]
struct MonitorRequest {
    monitor: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConnectRequest {
    Rule {
        node: String,
        rule: Option<RuleId>,
        in_port: PortId,
        out_port: PortId,
        channels: Vec<ChannelId>,
        src_node: Option<String>,
    },
    Transmit {
        src: String,
        dst: String,
        bit_rate: f64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DisconnectRequest {
    Rule { node: String, rule: RuleId },
    Traffic { traffic: TrafficId },
}

#[derive(Debug, Deserialize)]
struct SetGainRequest {
    amplifier: String,
    gain_db: f64,
}

fn parse<T: for<'de> Deserialize<'de>>(handler: Handler, request: &Value) -> Result<T, ControlError> {
    T::deserialize(request).map_err(|source| ControlError::InvalidRequest { handler, source })
}

impl Network {
    /// Dispatch a request to the handler with the given name.
    pub fn handle(&mut self, name: &str, request: &Value) -> Result<Value, ControlError> {
        let Ok(handler) = Handler::from_str(name) else {
            log::error!("Unknown handler {name}");
            return Err(ControlError::UnknownHandler(name.to_string()));
        };
        log::debug!("{handler}: {request}");
        match handler {
            Handler::Nodes => Ok(Value::Array(
                self.nodes()
                    .iter()
                    .map(|n| {
                        json!({
                            "id": n.id(),
                            "name": n.name(),
                            "type": match n {
                                Node::LineTerminal(_) => "line_terminal",
                                Node::Roadm(_) => "roadm",
                            },
                        })
                    })
                    .collect(),
            )),
            Handler::Links => Ok(Value::Array(
                self.links()
                    .iter()
                    .map(|l| {
                        json!({
                            "id": l.id,
                            "name": l.name,
                            "src": l.src,
                            "dst": l.dst,
                            "src_out_port": l.src_out_port,
                            "dst_in_port": l.dst_in_port,
                            "length_km": l.length() / 1e3,
                            "channels": l.channels().collect::<Vec<_>>(),
                        })
                    })
                    .collect(),
            )),
            Handler::Ports => {
                let req: NodeRequest = parse(handler, request)?;
                let id = self.node_id(&req.node)?;
                Ok(serde_json::to_value(self.node(id)?.ports())?)
            }
            Handler::Rules => {
                let req: NodeRequest = parse(handler, request)?;
                let id = self.node_id(&req.node)?;
                Ok(serde_json::to_value(&self.roadm(id)?.switch_table)?)
            }
            Handler::Monitor => {
                let req: MonitorRequest = parse(handler, request)?;
                let view = self.monitor(&req.monitor)?;
                Ok(json!({
                    "osnr": view.get_list_osnr(),
                    "gosnr": view.get_list_gosnr(),
                    "osnr_qot": view.get_list_osnr_qot(),
                    "gosnr_qot": view.get_list_gosnr_qot(),
                }))
            }
            Handler::Connect => match parse(handler, request)? {
                ConnectRequest::Rule {
                    node,
                    rule,
                    in_port,
                    out_port,
                    channels,
                    src_node,
                } => {
                    let id = self.node_id(&node)?;
                    let src_node = src_node.map(|n| self.node_id(&n)).transpose()?;
                    let rule = match rule {
                        Some(rule) => rule,
                        None => self.roadm(id)?.next_rule_id(),
                    };
                    self.install_switch_rule(id, rule, in_port, out_port, channels, src_node)?;
                    Ok(json!({ "rule": rule }))
                }
                ConnectRequest::Transmit { src, dst, bit_rate } => {
                    let (src, dst) = (self.node_id(&src)?, self.node_id(&dst)?);
                    let traffic = self.transmit(src, dst, bit_rate, None, None)?;
                    Ok(json!({ "traffic": traffic }))
                }
            },
            Handler::Disconnect => match parse(handler, request)? {
                DisconnectRequest::Rule { node, rule } => {
                    let id = self.node_id(&node)?;
                    let rule = self.delete_switch_rule(id, rule)?;
                    Ok(serde_json::to_value(rule)?)
                }
                DisconnectRequest::Traffic { traffic } => {
                    self.stop(traffic)?;
                    Ok(Value::Null)
                }
            },
            Handler::Reset => {
                self.reset_gains()?;
                Ok(Value::Null)
            }
            Handler::SetGain => {
                let req: SetGainRequest = parse(handler, request)?;
                self.set_amplifier_gain(&req.amplifier, req.gain_db)?;
                Ok(Value::Null)
            }
        }
    }
}
