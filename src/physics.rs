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
//! Closed-form physical-layer models: ASE noise of an EDFA stage, nonlinear interference after
//! the Gaussian-Noise model, and Raman cross-talk after Zirngibl.
use std::{collections::BTreeMap, f64::consts::PI};

use crate::{
    signal::{ChannelId, ChannelStates, Signal, SignalMap},
    span::Span,
    units::{db_to_abs, PLANCK},
};

/// ASE noise after an amplifier stage \[W\].
///
/// The incoming noise is amplified by `gain` (linear) and the stage adds
/// `nf * h * f * B * (G - 1)` of spontaneous emission.
pub fn amplified_spontaneous_emission(
    accumulated_noise: f64,
    gain: f64,
    noise_figure_db: f64,
    frequency: f64,
    bandwidth: f64,
) -> f64 {
    let generated = db_to_abs(noise_figure_db) * PLANCK * frequency * bandwidth * (gain - 1.0);
    accumulated_noise * gain + generated.max(0.0)
}

/// Interaction kernel between the channel under test and an interfering channel.
///
/// Self-channel and cross-channel interference use different closed forms.
pub fn psi_factor(cut: &Signal, ch: &Signal, span: &Span) -> f64 {
    let beta2 = span.beta2.abs();
    let asymptotic_length = span.asymptotic_length;
    if cut.index == ch.index {
        (0.5 * PI.powi(2) * asymptotic_length * beta2 * cut.symbol_rate.powi(2)).asinh()
    } else {
        let delta_f = (ch.frequency - cut.frequency).abs();
        let scale = PI.powi(2) * asymptotic_length * beta2 * cut.symbol_rate;
        (scale * (delta_f + 0.5 * ch.symbol_rate)).asinh()
            - (scale * (delta_f - 0.5 * ch.symbol_rate)).asinh()
    }
}

/// NLI noise generated in `span` for every channel of `states` \[W\].
///
/// The result is the contribution of this span only. Callers accumulate it.
pub fn gn_analytic(
    span: &Span,
    signals: &SignalMap,
    states: &ChannelStates,
) -> BTreeMap<ChannelId, f64> {
    let beta2 = span.beta2.abs();
    if beta2 == 0.0 || span.effective_length == 0.0 {
        return states.keys().map(|ch| (*ch, 0.0)).collect();
    }
    let eta = (16.0 / 27.0) * (span.non_linear_coefficient * span.effective_length).powi(2)
        / (2.0 * PI * beta2 * span.asymptotic_length);

    let present = states
        .iter()
        .filter_map(|(ch, state)| signals.get(ch).map(|signal| (signal, state.power)))
        .collect::<Vec<_>>();

    present
        .iter()
        .map(|(cut, cut_power)| {
            let g_cut = cut_power / cut.symbol_rate;
            let g_nli: f64 = present
                .iter()
                .map(|(ch, ch_power)| {
                    let g_ch = ch_power / ch.symbol_rate;
                    g_ch.powi(2) * g_cut * psi_factor(cut, ch, span)
                })
                .sum();
            (cut.index, g_nli * eta * cut.symbol_rate)
        })
        .collect()
}

/// Redistribute power between channels due to stimulated Raman scattering.
///
/// Every channel's power and both noise accumulators are scaled by the same factor. Nothing
/// happens with fewer than two channels or a single occupied frequency.
pub fn zirngibl_srs(span: &Span, signals: &SignalMap, states: &mut ChannelStates) {
    if states.len() < 2 {
        return;
    }
    let frequencies = states
        .keys()
        .filter_map(|ch| signals.get(ch).map(|s| s.frequency))
        .collect::<Vec<_>>();
    let f_min = frequencies.iter().copied().fold(f64::INFINITY, f64::min);
    let f_max = frequencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let bandwidth = f_max - f_min;
    let total_power: f64 = states.values().map(|s| s.power).sum();
    let x = span.raman_coefficient * total_power * span.effective_length_power;
    if !(bandwidth > 0.0 && x > 0.0) {
        return;
    }

    let normalization = (x * bandwidth).exp_m1();
    for (ch, state) in states.iter_mut() {
        let Some(signal) = signals.get(ch) else {
            continue;
        };
        let delta_p = x * bandwidth * (x * (signal.frequency - f_min)).exp() / normalization;
        log::trace!("srs on span {}: channel {ch} scaled by {delta_p:.6}", span.id);
        state.scale(delta_p);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::ChannelGrid,
        signal::{SignalState, Transceiver},
        span::FibreType,
        units::{dbm_to_watt, GHZ},
    };

    fn channels(indices: &[ChannelId], dbm: f64) -> (SignalMap, ChannelStates) {
        let grid = ChannelGrid::default();
        let tx = Transceiver::new(0, "tx", dbm);
        let signals = indices
            .iter()
            .map(|i| (*i, Signal::new(*i, &grid, &tx)))
            .collect();
        let states = indices
            .iter()
            .map(|i| (*i, SignalState::launch(dbm_to_watt(dbm))))
            .collect();
        (signals, states)
    }

    #[test]
    fn test_ase_of_unity_gain_stage() {
        let ase = amplified_spontaneous_emission(1e-9, 1.0, 5.5, 193e12, 12.5 * GHZ);
        assert_eq!(ase, 1e-9);
        let ase = amplified_spontaneous_emission(0.0, 100.0, 5.5, 193e12, 12.5 * GHZ);
        let expected = db_to_abs(5.5) * PLANCK * 193e12 * 12.5e9 * 99.0;
        assert!((ase - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_psi_symmetry() {
        let (signals, _) = channels(&[1, 2, 10], 0.0);
        let span = Span::new(0, FibreType::Smf, 80.0);
        let psi_12 = psi_factor(&signals[&1], &signals[&2], &span);
        let psi_21 = psi_factor(&signals[&2], &signals[&1], &span);
        let psi_1_10 = psi_factor(&signals[&1], &signals[&10], &span);
        let sci = psi_factor(&signals[&1], &signals[&1], &span);
        assert!((psi_12 - psi_21).abs() < 1e-12);
        // interference decays with the channel separation
        assert!(psi_1_10 < psi_12);
        assert!(sci > psi_12);
    }

    #[test]
    fn test_gn_scales_cubically() {
        let span = Span::new(0, FibreType::Smf, 80.0);
        let (signals, low) = channels(&[1], 0.0);
        let (_, high) = channels(&[1], 3.0);
        let nli_low = gn_analytic(&span, &signals, &low)[&1];
        let nli_high = gn_analytic(&span, &signals, &high)[&1];
        assert!(nli_low > 0.0);
        let ratio = nli_high / nli_low;
        assert!((ratio - db_to_abs(9.0)).abs() / ratio < 1e-9);
    }

    #[test]
    fn test_gn_cross_channel_increases_nli() {
        let span = Span::new(0, FibreType::Smf, 80.0);
        let (signals, single) = channels(&[5], 0.0);
        let (signals_wdm, wdm) = channels(&[4, 5, 6], 0.0);
        let alone = gn_analytic(&span, &signals, &single)[&5];
        let loaded = gn_analytic(&span, &signals_wdm, &wdm);
        assert!(loaded[&5] > alone);
        // center channel sees the most interference
        assert!(loaded[&5] > loaded[&4]);
        assert!((loaded[&4] - loaded[&6]).abs() / loaded[&4] < 1e-9);
    }

    #[test]
    fn test_srs_conserves_power() {
        let span = Span::new(0, FibreType::Smf, 80.0);
        let (signals, mut states) = channels(&(1..=40).collect::<Vec<_>>(), 5.0);
        let before: f64 = states.values().map(|s| s.power).sum();
        zirngibl_srs(&span, &signals, &mut states);
        let after: f64 = states.values().map(|s| s.power).sum();
        assert!((before - after).abs() / before < 1e-3);
        // the tilt is monotonic over the band
        assert!(states[&40].power > states[&1].power);
    }

    #[test]
    fn test_srs_single_channel_noop() {
        let span = Span::new(0, FibreType::Smf, 80.0);
        let (signals, mut states) = channels(&[7], 5.0);
        let before = states.clone();
        zirngibl_srs(&span, &signals, &mut states);
        assert_eq!(before, states);
    }
}
