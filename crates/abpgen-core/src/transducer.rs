//! Pressure to voltage conversion for the invasive blood-pressure input
//!
//! The DAQ output drives the monitor's IBP input through a resistive network:
//! R1 and R2 in series form the excitation return, R3 and R4 form the sense
//! tap. The monitor expects a transducer with a sensitivity of 5 uV/V/mmHg at
//! 5 V excitation, so the DAQ has to produce the bridge signal scaled up by
//! the inverse of the divider attenuation.

/// Excitation-side resistors (ohms)
pub const R1_OHMS: f64 = 20_000.0;
pub const R2_OHMS: f64 = 20_000.0;
/// Sense-tap resistors (ohms)
pub const R3_OHMS: f64 = 50.0;
pub const R4_OHMS: f64 = 50.0;

/// Bridge excitation voltage supplied by the monitor
pub const EXCITATION_VOLTAGE_V: f64 = 5.0;

/// Transducer sensitivity per volt of excitation (uV/V/mmHg)
pub const SENSITIVITY_UV_PER_V_PER_MMHG: f64 = 5.0;

/// Sensitivity at the fixed excitation (uV/mmHg)
pub const SENSITIVITY_UV_PER_MMHG: f64 = SENSITIVITY_UV_PER_V_PER_MMHG * EXCITATION_VOLTAGE_V;

/// Divider ratio seen by the sense tap: (R3 + R4) / (R1 + R2 + R3 + R4)
pub const ATTENUATION_FACTOR: f64 = (R3_OHMS + R4_OHMS) / (R1_OHMS + R2_OHMS + R3_OHMS + R4_OHMS);

const MICROVOLTS_PER_VOLT: f64 = 1_000_000.0;

/// Convert a pressure in mmHg to the DAQ output voltage
///
/// `volts = pressure * sensitivity / (attenuation * 1e6)`
///
/// # Example
/// ```
/// use abpgen_core::transducer::pressure_to_volts;
///
/// // 100 mmHg -> 2500 uV at the bridge, x401 through the divider
/// assert!((pressure_to_volts(100.0) - 1.0025).abs() < 1e-12);
/// ```
pub fn pressure_to_volts(pressure_mmhg: f64) -> f64 {
    let bridge_uv = pressure_mmhg * SENSITIVITY_UV_PER_MMHG;
    bridge_uv / (ATTENUATION_FACTOR * MICROVOLTS_PER_VOLT)
}

/// Convert a whole waveform, element by element
pub fn pressures_to_volts(pressures_mmhg: &[f64]) -> Vec<f64> {
    pressures_mmhg.iter().copied().map(pressure_to_volts).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constants() {
        assert_relative_eq!(SENSITIVITY_UV_PER_MMHG, 25.0);
        assert_relative_eq!(ATTENUATION_FACTOR, 100.0 / 40_100.0);
    }

    #[test]
    fn test_zero_pressure_is_zero_volts() {
        assert_eq!(pressure_to_volts(0.0), 0.0);
    }

    #[test]
    fn test_linear() {
        for x in [1.0, 12.5, 80.0, 120.0, 299.9] {
            assert_relative_eq!(
                pressure_to_volts(2.0 * x),
                2.0 * pressure_to_volts(x),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_known_values() {
        // 25 uV/mmHg * 401 = 10.025 mV/mmHg
        assert_relative_eq!(pressure_to_volts(1.0), 0.010025, max_relative = 1e-12);
        assert_relative_eq!(pressure_to_volts(300.0), 3.0075, max_relative = 1e-12);
    }

    #[test]
    fn test_full_scale_within_output_range() {
        assert!(pressure_to_volts(crate::MAX_PRESSURE_MMHG) < 10.0);
    }

    #[test]
    fn test_vector_matches_scalar() {
        let pressures = [0.0, 80.0, 120.0, 95.5];
        let volts = pressures_to_volts(&pressures);
        assert_eq!(volts.len(), pressures.len());
        for (v, p) in volts.iter().zip(pressures) {
            assert_eq!(*v, pressure_to_volts(p));
        }
    }
}
