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
//! The two computations every link runs: the physical simulation and the analytical
//! quality-of-transmission estimate. Both implement [`NoiseModel`], and the link selects the
//! model per pass instead of duplicating its propagation steps.
use crate::{
    amplifier::{Amplifier, AmplifierError},
    config::{BalancingConfig, MonitorPolicy},
    physics::gn_analytic,
    signal::{ChannelStates, Estimate, SignalMap},
    span::Span,
};

/// Where in a link a span's NLI is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct SpanContext<'a> {
    /// 1-based position of the span within its link.
    pub span_number: usize,
    /// Simulated state right after the NLI stage of the same span, if already computed.
    pub reference: Option<&'a ChannelStates>,
}

pub trait NoiseModel {
    fn estimate(&self) -> Estimate;

    /// Amplify all signals in `input`.
    fn amplify(
        &self,
        amplifier: &mut Amplifier,
        signals: &SignalMap,
        input: &ChannelStates,
    ) -> Result<ChannelStates, AmplifierError>;

    /// Add the NLI generated in `span` to the accumulated NLI of every signal.
    fn accumulate_nli(
        &self,
        span: &Span,
        signals: &SignalMap,
        states: &mut ChannelStates,
        ctx: SpanContext<'_>,
    );
}

fn add_gn_contribution(span: &Span, signals: &SignalMap, states: &mut ChannelStates) {
    let nli = gn_analytic(span, signals, states);
    for (ch, state) in states.iter_mut() {
        state.nli_noise += nli.get(ch).copied().unwrap_or_default();
    }
}

/// Physical simulation: gain ripple, power balancing and the GN model on every span.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulated {
    pub balancing: BalancingConfig,
}

impl NoiseModel for Simulated {
    fn estimate(&self) -> Estimate {
        Estimate::Simulated
    }

    fn amplify(
        &self,
        amplifier: &mut Amplifier,
        signals: &SignalMap,
        input: &ChannelStates,
    ) -> Result<ChannelStates, AmplifierError> {
        amplifier.amplify(signals, input, &self.balancing)
    }

    fn accumulate_nli(
        &self,
        span: &Span,
        signals: &SignalMap,
        states: &mut ChannelStates,
        _ctx: SpanContext<'_>,
    ) {
        add_gn_contribution(span, signals, states)
    }
}

/// Analytical estimate: flat target gain on every amplifier.
///
/// With a monitor policy, every `unit`-th span takes the simulated NLI verbatim, modeling an
/// opto-electronic monitor that overrides the estimate at sparse points.
#[derive(Debug, Clone, Copy, Default)]
pub struct QotEstimator {
    pub monitor_policy: Option<MonitorPolicy>,
}

impl NoiseModel for QotEstimator {
    fn estimate(&self) -> Estimate {
        Estimate::Estimated
    }

    fn amplify(
        &self,
        amplifier: &mut Amplifier,
        signals: &SignalMap,
        input: &ChannelStates,
    ) -> Result<ChannelStates, AmplifierError> {
        Ok(amplifier.amplify_estimated(signals, input))
    }

    fn accumulate_nli(
        &self,
        span: &Span,
        signals: &SignalMap,
        states: &mut ChannelStates,
        ctx: SpanContext<'_>,
    ) {
        let sampled = self
            .monitor_policy
            .is_some_and(|policy| policy.samples(ctx.span_number));
        match ctx.reference {
            Some(reference) if sampled => {
                log::trace!("monitor override of the NLI estimate at span {}", span.id);
                let mut missing = false;
                for (ch, state) in states.iter_mut() {
                    match reference.get(ch) {
                        Some(r) => state.nli_noise = r.nli_noise,
                        None => missing = true,
                    }
                }
                if missing {
                    // channels without a simulated counterpart keep the analytical value
                    let nli = gn_analytic(span, signals, states);
                    for (ch, state) in states.iter_mut() {
                        if !reference.contains_key(ch) {
                            state.nli_noise += nli.get(ch).copied().unwrap_or_default();
                        }
                    }
                }
            }
            _ => add_gn_contribution(span, signals, states),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::ChannelGrid,
        signal::{Signal, SignalState, Transceiver},
        span::FibreType,
    };

    fn setup() -> (Span, SignalMap, ChannelStates) {
        let grid = ChannelGrid::default();
        let tx = Transceiver::new(0, "tx", 0.0);
        let signals = [1, 2]
            .into_iter()
            .map(|i| (i, Signal::new(i, &grid, &tx)))
            .collect();
        let states = [1, 2]
            .into_iter()
            .map(|i| (i, SignalState::launch(1e-3)))
            .collect();
        (Span::new(0, FibreType::Smf, 80.0), signals, states)
    }

    #[test]
    fn test_models_agree_without_policy() {
        let (span, signals, states) = setup();
        let mut sim = states.clone();
        let mut est = states.clone();
        let ctx = SpanContext {
            span_number: 1,
            reference: None,
        };
        Simulated::default().accumulate_nli(&span, &signals, &mut sim, ctx);
        QotEstimator::default().accumulate_nli(&span, &signals, &mut est, ctx);
        assert_eq!(sim, est);
        assert!(sim[&1].nli_noise > 0.0);
    }

    #[test]
    fn test_monitor_override() {
        let (span, signals, states) = setup();
        let mut reference = states.clone();
        reference.get_mut(&1).unwrap().nli_noise = 1.0;
        reference.get_mut(&2).unwrap().nli_noise = 2.0;
        let model = QotEstimator {
            monitor_policy: Some(MonitorPolicy { unit: 2 }),
        };

        let mut sampled = states.clone();
        let ctx = SpanContext {
            span_number: 4,
            reference: Some(&reference),
        };
        model.accumulate_nli(&span, &signals, &mut sampled, ctx);
        assert_eq!(sampled[&1].nli_noise, 1.0);
        assert_eq!(sampled[&2].nli_noise, 2.0);

        let mut skipped = states.clone();
        let ctx = SpanContext {
            span_number: 3,
            reference: Some(&reference),
        };
        model.accumulate_nli(&span, &signals, &mut skipped, ctx);
        assert!(skipped[&1].nli_noise < 1e-3);
    }
}
