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
//! Physical constants and unit conversions. All quantities inside the crate are SI: Watt, meter,
//! Hertz and second. Decibel values only appear at the API boundary.

/// Speed of light in vacuum \[m/s\]
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Planck constant \[J s\]
pub const PLANCK: f64 = 6.626_070_15e-34;

pub const NM: f64 = 1e-9;
pub const UM: f64 = 1e-6;
pub const CM: f64 = 1e-2;
pub const KM: f64 = 1e3;
pub const GHZ: f64 = 1e9;
pub const THZ: f64 = 1e12;
pub const PS: f64 = 1e-12;
pub const MW: f64 = 1e-3;

/// Reference bandwidth of 0.1 nm at 1550 nm, used to normalize OSNR measurements.
pub const REFERENCE_BANDWIDTH: f64 = 12.5 * GHZ;

/// Convert a value in dB into its linear representation.
pub fn db_to_abs(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear value into dB.
pub fn abs_to_db(abs: f64) -> f64 {
    10.0 * abs.log10()
}

pub fn dbm_to_watt(dbm: f64) -> f64 {
    db_to_abs(dbm) * MW
}

pub fn watt_to_dbm(watt: f64) -> f64 {
    abs_to_db(watt / MW)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_db_round_trip() {
        for x in [1e-9, 0.001, 0.5, 1.0, 2.0, 17.6, 1234.5, 1e12] {
            let back = db_to_abs(abs_to_db(x));
            assert!((back - x).abs() <= 1e-12 * x, "{x} became {back}");
        }
        for db in [-30.0, -3.0, 0.0, 3.0, 17.6] {
            assert!((abs_to_db(db_to_abs(db)) - db).abs() < 1e-12);
        }
    }

    #[test]
    fn test_dbm() {
        assert!((dbm_to_watt(0.0) - 1e-3).abs() < 1e-15);
        assert!((dbm_to_watt(30.0) - 1.0).abs() < 1e-12);
        assert!((watt_to_dbm(1e-3)).abs() < 1e-12);
    }
}
