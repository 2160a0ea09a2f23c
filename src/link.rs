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
//! Unidirectional fiber links.
//!
//! A [`Link`] owns an optional boost amplifier and an ordered list of spans, each optionally
//! followed by an in-line amplifier. [`Link::propagate`] steps the signals loaded at the link
//! input through this chain, once per [`NoiseModel`].
use serde::Serialize;
use thiserror::Error;

use crate::{
    amplifier::{Amplifier, AmplifierError},
    node::{NodeId, PortId},
    noise_model::{NoiseModel, SpanContext},
    physics::zirngibl_srs,
    signal::{ChannelId, ChannelStates, Estimate, Estimates, SignalBundle, SignalMap},
    span::Span,
    units::db_to_abs,
};

pub type LinkId = usize;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("Link {0} has no amplifier named {1}")]
    UnknownAmplifier(String, String),
    #[error("Amplifier {amplifier} on link {link}: {error}")]
    Amplifier {
        link: String,
        amplifier: String,
        error: AmplifierError,
    },
}

/// A span followed by an optional in-line amplifier.
#[derive(Debug, Clone)]
pub struct SpanTuple {
    pub span: Span,
    pub amplifier: Option<Amplifier>,
}

/// Signal state recorded at the points of a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpanState {
    /// After the NLI stage, right at the span input.
    pub launched: ChannelStates,
    /// After the fiber loss, before the in-line amplifier.
    pub attenuated: ChannelStates,
}

/// Signal state recorded along the link in one estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkState {
    pub input: ChannelStates,
    pub boost_output: Option<ChannelStates>,
    pub spans: Vec<SpanState>,
    pub output: ChannelStates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    Full,
    /// Stop after the boost amplifier to measure the effect of a VOA change.
    VoaCompensation,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    pub name: String,
    pub src: NodeId,
    pub dst: NodeId,
    pub src_out_port: PortId,
    pub dst_in_port: PortId,
    pub boost_amp: Option<Amplifier>,
    pub spans: Vec<SpanTuple>,
    /// Apply Raman cross-talk on every span.
    pub srs_effect: bool,
    pub signals: SignalMap,
    pub state: Estimates<LinkState>,
}

impl Link {
    pub fn new(
        id: LinkId,
        name: impl Into<String>,
        (src, src_out_port): (NodeId, PortId),
        (dst, dst_in_port): (NodeId, PortId),
    ) -> Self {
        Self {
            id,
            name: name.into(),
            src,
            dst,
            src_out_port,
            dst_in_port,
            boost_amp: None,
            spans: Vec::new(),
            srs_effect: false,
            signals: SignalMap::new(),
            state: Estimates::default(),
        }
    }

    /// Total fiber length \[m\]
    pub fn length(&self) -> f64 {
        self.spans.iter().map(|s| s.span.length).sum()
    }

    pub fn add_span(&mut self, span: Span, amplifier: Option<Amplifier>) {
        self.spans.push(SpanTuple { span, amplifier });
    }

    pub fn amplifiers(&self) -> impl Iterator<Item = &Amplifier> {
        self.boost_amp
            .iter()
            .chain(self.spans.iter().filter_map(|s| s.amplifier.as_ref()))
    }

    pub fn amplifiers_mut(&mut self) -> impl Iterator<Item = &mut Amplifier> {
        self.boost_amp
            .iter_mut()
            .chain(self.spans.iter_mut().filter_map(|s| s.amplifier.as_mut()))
    }

    pub fn amplifier(&self, name: &str) -> Option<&Amplifier> {
        self.amplifiers().find(|a| a.name == name)
    }

    pub fn amplifier_mut(&mut self, name: &str) -> Result<&mut Amplifier, LinkError> {
        let link = self.name.clone();
        self.amplifiers_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| LinkError::UnknownAmplifier(link, name.to_string()))
    }

    /// Replace the signals at the link input.
    pub fn load(&mut self, bundle: SignalBundle) {
        self.signals = bundle.signals;
        self.state.simulated.input = bundle.states.simulated;
        self.state.estimated.input = bundle.states.estimated;
    }

    /// Channels currently present anywhere on the link.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.signals.keys().copied()
    }

    /// Signals as they leave the link.
    pub fn output(&self) -> SignalBundle {
        SignalBundle {
            signals: self.signals.clone(),
            states: Estimates::new(
                self.state.simulated.output.clone(),
                self.state.estimated.output.clone(),
            ),
        }
    }

    /// Run the simulation and then the estimate. The estimate may reuse simulated NLI values.
    ///
    /// In [`PropagationMode::VoaCompensation`], only the simulated boost output is computed and
    /// returned.
    pub fn propagate(
        &mut self,
        simulated: &dyn NoiseModel,
        estimated: &dyn NoiseModel,
        mode: PropagationMode,
    ) -> Result<Option<ChannelStates>, LinkError> {
        log::debug!("propagating {} channels over {}", self.signals.len(), self.name);
        if mode == PropagationMode::VoaCompensation {
            return self.run(simulated, mode);
        }
        self.run(simulated, mode)?;
        self.run(estimated, mode)?;
        Ok(None)
    }

    fn run(
        &mut self,
        model: &dyn NoiseModel,
        mode: PropagationMode,
    ) -> Result<Option<ChannelStates>, LinkError> {
        let estimate = model.estimate();
        let link_name = &self.name;
        let wrap = |amp: &Amplifier, error: AmplifierError| LinkError::Amplifier {
            link: link_name.clone(),
            amplifier: amp.name.clone(),
            error,
        };

        let mut states = self.state.get(estimate).input.clone();
        let mut boost_output = None;
        if let Some(boost) = self.boost_amp.as_mut() {
            states = model
                .amplify(boost, &self.signals, &states)
                .map_err(|e| wrap(boost, e))?;
            if mode == PropagationMode::VoaCompensation {
                return Ok(Some(states));
            }
            boost_output = Some(states.clone());
        }

        let reference = match estimate {
            Estimate::Simulated => None,
            Estimate::Estimated => Some(&self.state.simulated.spans),
        };
        let mut records = Vec::with_capacity(self.spans.len());
        for (i, tuple) in self.spans.iter_mut().enumerate() {
            let span = &tuple.span;
            if span.input_loss_db > 0.0 {
                let loss = db_to_abs(-span.input_loss_db);
                states.values_mut().for_each(|s| s.scale(loss));
            }

            if tuple.amplifier.is_some() {
                let ctx = SpanContext {
                    span_number: i + 1,
                    reference: reference
                        .and_then(|spans| spans.get(i))
                        .map(|s| &s.launched),
                };
                model.accumulate_nli(span, &self.signals, &mut states, ctx);
            }
            let launched = states.clone();

            if self.srs_effect && states.len() > 1 {
                zirngibl_srs(span, &self.signals, &mut states);
            }

            let attenuation = span.attenuation();
            states
                .values_mut()
                .for_each(|s| s.scale(1.0 / attenuation));
            let attenuated = states.clone();
            log::trace!("{}: span {} ({:.1} km) done", link_name, span.id, span.length_km());

            if let Some(amp) = tuple.amplifier.as_mut() {
                states = model
                    .amplify(amp, &self.signals, &states)
                    .map_err(|e| wrap(amp, e))?;
            }
            records.push(SpanState {
                launched,
                attenuated,
            });
        }

        let state = self.state.get_mut(estimate);
        state.boost_output = boost_output;
        state.spans = records;
        state.output = states;
        Ok(None)
    }

    /// Remove every trace of the given channels from the link and its amplifiers.
    pub fn clean_optical_signals(&mut self, channels: &[ChannelId]) {
        for ch in channels {
            self.signals.remove(ch);
        }
        for state in [&mut self.state.simulated, &mut self.state.estimated] {
            let points = std::iter::once(&mut state.input)
                .chain(state.boost_output.iter_mut())
                .chain(
                    state
                        .spans
                        .iter_mut()
                        .flat_map(|s| [&mut s.launched, &mut s.attenuated]),
                )
                .chain(std::iter::once(&mut state.output));
            for point in points {
                for ch in channels {
                    point.remove(ch);
                }
            }
        }
        for amp in self.amplifiers_mut() {
            amp.clean_optical_signals(channels);
        }
    }

    /// Channels with leftover state anywhere on the link, including its amplifiers.
    pub fn stale_channels(&self) -> std::collections::BTreeSet<ChannelId> {
        let mut channels = self.signals.keys().copied().collect::<std::collections::BTreeSet<_>>();
        for state in [&self.state.simulated, &self.state.estimated] {
            channels.extend(state.input.keys());
            channels.extend(state.output.keys());
        }
        for amp in self.amplifiers() {
            channels.extend(amp.channels());
        }
        channels
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::{BalancingConfig, ChannelGrid, MonitorPolicy},
        noise_model::{QotEstimator, Simulated},
        physics::gn_analytic,
        signal::{Signal, SignalState, Transceiver},
        span::FibreType,
        units::{abs_to_db, dbm_to_watt},
    };

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

    fn link(num_spans: usize, km: f64) -> Link {
        let mut link = Link::new(0, "a-b", (0, 0), (1, 0));
        for i in 0..num_spans {
            let span = Span::new(i, FibreType::Smf, km);
            let gain = span.loss_db;
            link.add_span(span, Some(Amplifier::new(format!("amp{i}"), gain)));
        }
        link
    }

    #[test]
    fn test_length_additivity() {
        let empty = Link::new(0, "empty", (0, 0), (1, 0));
        assert_eq!(empty.length(), 0.0);
        let mut l = Link::new(1, "l", (0, 0), (1, 0));
        l.add_span(Span::new(0, FibreType::Smf, 50.0), None);
        l.add_span(Span::new(1, FibreType::Smf, 30.0), None);
        assert!((l.length() - 80e3).abs() < 1e-6);
    }

    #[test]
    fn test_raw_span_passes_through() {
        let mut l = Link::new(0, "patch", (0, 0), (1, 0));
        l.add_span(Span::new(0, FibreType::Smf, 0.0), None);
        l.load(bundle(&[1], 0.0));
        l.propagate(&Simulated::default(), &QotEstimator::default(), PropagationMode::Full)
            .unwrap();
        assert_eq!(l.state.simulated.output, l.state.simulated.input);
        assert_eq!(l.state.estimated.output, l.state.estimated.input);
    }

    #[test]
    fn test_nli_additivity() {
        let n = 4;
        let mut l = link(n, 80.0);
        l.load(bundle(&[10], 0.0));
        l.propagate(&Simulated::default(), &QotEstimator::default(), PropagationMode::Full)
            .unwrap();

        let single = gn_analytic(
            &l.spans[0].span,
            &l.signals,
            &l.state.simulated.input,
        )[&10];
        let out = l.state.simulated.output[&10];
        assert!((out.nli_noise - n as f64 * single).abs() / out.nli_noise < 1e-6);
        // power is restored after every span
        assert!((abs_to_db(out.power / dbm_to_watt(0.0))).abs() < 0.01);
        assert!(out.gosnr() < out.osnr());
    }

    #[test]
    fn test_boost_and_voa_mode() {
        let mut l = link(1, 50.0);
        l.boost_amp = Some(Amplifier::new("boost", 3.0).boost(true));
        l.load(bundle(&[1, 2], -17.0));
        let boost = l
            .propagate(
                &Simulated::default(),
                &QotEstimator::default(),
                PropagationMode::VoaCompensation,
            )
            .unwrap()
            .unwrap();
        assert!((watt_dbm(boost[&1].power) + 14.0).abs() < 0.01);
        assert!(l.state.simulated.output.is_empty());

        l.propagate(&Simulated::default(), &QotEstimator::default(), PropagationMode::Full)
            .unwrap();
        assert_eq!(l.state.simulated.output.len(), 2);
        assert_eq!(l.state.estimated.output.len(), 2);
        assert!(l.amplifiers().all(|a| a.is_consistent(Estimate::Simulated)));
    }

    fn watt_dbm(w: f64) -> f64 {
        crate::units::watt_to_dbm(w)
    }

    #[test]
    fn test_monitor_policy_copies_simulated_nli() {
        let mut l = link(4, 80.0);
        l.spans[1]
            .amplifier
            .as_mut()
            .unwrap()
            .ripple = crate::amplifier::GainRipple::Profile(vec![0.5; 90]);
        l.load(bundle(&[1, 2, 3], 1.0));
        let qot = QotEstimator {
            monitor_policy: Some(MonitorPolicy { unit: 2 }),
        };
        l.propagate(&Simulated::default(), &qot, PropagationMode::Full)
            .unwrap();
        let sim = &l.state.simulated.spans;
        let est = &l.state.estimated.spans;
        for ch in [1, 2, 3] {
            assert_eq!(est[1].launched[&ch].nli_noise, sim[1].launched[&ch].nli_noise);
            assert_eq!(est[3].launched[&ch].nli_noise, sim[3].launched[&ch].nli_noise);
        }
    }

    #[test]
    fn test_srs_changes_only_tilt() {
        let mut l = link(2, 80.0);
        l.srs_effect = true;
        l.load(bundle(&[1, 40], 5.0));
        l.propagate(&Simulated::default(), &QotEstimator::default(), PropagationMode::Full)
            .unwrap();
        let out = &l.state.simulated.output;
        assert!(out[&40].power > out[&1].power);
        let total_in: f64 = l.state.simulated.input.values().map(|s| s.power).sum();
        let total_out: f64 = out.values().map(|s| s.power).sum();
        assert!(abs_to_db(total_out / total_in).abs() < 0.01);
    }

    #[test]
    fn test_non_convergence_propagates() {
        let mut l = link(1, 50.0);
        l.load(bundle(&[1], 0.0));
        let sim = Simulated {
            balancing: BalancingConfig {
                max_iterations: 1,
                tolerance_db: 1e-3,
            },
        };
        let err = l
            .propagate(&sim, &QotEstimator::default(), PropagationMode::Full)
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Amplifier {
                error: AmplifierError::GainBalancingDidNotConverge { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_clean_optical_signals() {
        let mut l = link(2, 50.0);
        l.load(bundle(&[1, 2], 0.0));
        l.propagate(&Simulated::default(), &QotEstimator::default(), PropagationMode::Full)
            .unwrap();
        l.clean_optical_signals(&[1]);
        assert_eq!(l.stale_channels().into_iter().collect::<Vec<_>>(), vec![2]);
        assert!(!l.state.estimated.spans[0].launched.contains_key(&1));
    }
}
