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
//! Fiber spans. A [`Span`] is immutable after construction. Its derived constants are computed
//! once from the fibre type and the length.
use std::f64::consts::{E, PI};

use serde::{Deserialize, Serialize};

use crate::units::{db_to_abs, CM, KM, NM, PS, SPEED_OF_LIGHT, THZ, UM};

pub type SpanId = usize;

/// Reference wavelength for the dispersion coefficient \[m\]
const REFERENCE_WAVELENGTH: f64 = 1550.0 * NM;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
pub enum FibreType {
    /// Standard single-mode fiber (ITU-T G.652)
    #[default]
    #[strum(serialize = "SMF")]
    Smf,
}

/// Material constants of a fibre type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FibreParameters {
    /// \[dB/m\]
    pub attenuation: f64,
    /// \[1/W/m\]
    pub non_linear_coefficient: f64,
    /// \[s/m^2\]
    pub dispersion: f64,
    /// \[s^3/m\]
    pub dispersion_slope: f64,
    /// \[m^2\]
    pub effective_area: f64,
    /// \[m/W\]
    pub raman_gain: f64,
    /// \[Hz\]
    pub raman_amplification_band: f64,
}

impl FibreType {
    pub fn parameters(&self) -> FibreParameters {
        match self {
            Self::Smf => FibreParameters {
                attenuation: 0.22 / KM,
                non_linear_coefficient: 0.78 / KM,
                dispersion: 2.1e-5,
                dispersion_slope: 0.1452 * PS * PS * PS / KM,
                effective_area: 80.0 * UM * UM,
                raman_gain: 7e-12 * CM,
                raman_amplification_band: 15.0 * THZ,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub id: SpanId,
    pub fibre_type: FibreType,
    /// \[m\]
    pub length: f64,
    /// Total fiber loss \[dB\]
    pub loss_db: f64,
    /// Field attenuation coefficient, natural-log normalization \[1/m\]
    pub alpha: f64,
    /// Power attenuation coefficient, `0.23` scaling \[1/m\]
    pub alpha_power: f64,
    /// Effective length for the GN model \[m\]
    pub effective_length: f64,
    /// Effective length for the Raman model \[m\]
    pub effective_length_power: f64,
    /// \[m\]
    pub asymptotic_length: f64,
    /// \[1/W/m\]
    pub non_linear_coefficient: f64,
    /// Group velocity dispersion \[s^2/m\]
    pub beta2: f64,
    pub dispersion_slope: f64,
    /// \[1/W/m/Hz\]
    pub raman_coefficient: f64,
    /// Connector loss and input attenuation applied before the fiber \[dB\]
    pub input_loss_db: f64,
}

impl Span {
    pub fn new(id: SpanId, fibre_type: FibreType, length_km: f64) -> Self {
        let p = fibre_type.parameters();
        let length = length_km * KM;
        let alpha = p.attenuation / (20.0 * E.log10());
        let alpha_power = 0.23 * p.attenuation;
        let effective_length = if length > 0.0 {
            (1.0 - (-2.0 * alpha * length).exp()) / (2.0 * alpha)
        } else {
            0.0
        };
        let effective_length_power = if length > 0.0 {
            (1.0 - (-alpha_power * length).exp()) / alpha_power
        } else {
            0.0
        };
        Self {
            id,
            fibre_type,
            length,
            loss_db: p.attenuation * length,
            alpha,
            alpha_power,
            effective_length,
            effective_length_power,
            asymptotic_length: 1.0 / (2.0 * alpha),
            non_linear_coefficient: p.non_linear_coefficient,
            beta2: REFERENCE_WAVELENGTH.powi(2) * p.dispersion.abs() / (2.0 * PI * SPEED_OF_LIGHT),
            dispersion_slope: p.dispersion_slope,
            raman_coefficient: p.raman_gain
                / (2.0 * p.effective_area * p.raman_amplification_band),
            input_loss_db: 0.0,
        }
    }

    /// Add connector losses or an input attenuator in front of the fiber.
    pub fn with_input_loss(mut self, loss_db: f64) -> Self {
        self.input_loss_db = loss_db;
        self
    }

    pub fn length_km(&self) -> f64 {
        self.length / KM
    }

    /// Linear fiber loss of the span.
    pub fn attenuation(&self) -> f64 {
        db_to_abs(self.loss_db)
    }
}
