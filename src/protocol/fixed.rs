//! Fixed-point conversions used by the motion and connection-parameter frames.

const Q30: f64 = (1u32 << 30) as f64;
const Q16: f64 = (1u32 << 16) as f64;
const ACCEL_SCALE: f64 = (1u32 << 10) as f64; // 6Q10
const GYRO_SCALE: f64 = (1u32 << 5) as f64; // 11Q5
const COMPASS_SCALE: f64 = (1u32 << 4) as f64; // 12Q4

/// Connection intervals are carried in units of 1.25 ms.
pub const CONN_INTERVAL_UNIT_MS: f64 = 1.25;
/// Supervision timeout is carried in units of 10 ms.
pub const CONN_TIMEOUT_UNIT_MS: f64 = 10.0;

/// Integer part plus a hundredths byte (temperature, pressure).
pub fn with_hundredths(integer: i32, hundredths: u8) -> f64 {
    integer as f64 + hundredths as f64 / 100.0
}

/// Q2.30 orientation quaternion component.
pub fn q2_30(raw: i32) -> f64 {
    raw as f64 / Q30
}

/// Q16.16 Euler angle or heading, in degrees.
pub fn q16_16(raw: i32) -> f64 {
    raw as f64 / Q16
}

pub fn accel(raw: i16) -> f64 {
    raw as f64 / ACCEL_SCALE
}

pub fn gyro(raw: i16) -> f64 {
    raw as f64 / GYRO_SCALE
}

pub fn compass(raw: i16) -> f64 {
    raw as f64 / COMPASS_SCALE
}

/// Inverse of [`q16_16`]. Out-of-range inputs saturate.
pub fn to_q16_16(value: f64) -> i32 {
    (value * Q16).round() as i32
}

/// Inverse of [`q2_30`]. Out-of-range inputs saturate.
pub fn to_q2_30(value: f64) -> i32 {
    (value * Q30).round() as i32
}

pub fn conn_interval_ms(raw: u16) -> f64 {
    raw as f64 * CONN_INTERVAL_UNIT_MS
}

pub fn conn_timeout_ms(raw: u16) -> f64 {
    raw as f64 * CONN_TIMEOUT_UNIT_MS
}

pub fn to_conn_interval(ms: f64) -> u16 {
    (ms / CONN_INTERVAL_UNIT_MS).round() as u16
}

pub fn to_conn_timeout(ms: f64) -> u16 {
    (ms / CONN_TIMEOUT_UNIT_MS).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_values_scale_exactly() {
        assert_eq!(q2_30(1 << 30), 1.0);
        assert_eq!(q16_16(1 << 16), 1.0);
        assert_eq!(q2_30(0), 0.0);
        assert_eq!(q16_16(0), 0.0);
        assert_eq!(accel(0), 0.0);
        assert_eq!(gyro(0), 0.0);
        assert_eq!(compass(0), 0.0);
        assert_eq!(with_hundredths(0, 0), 0.0);
        assert_eq!(accel(1 << 10), 1.0);
        assert_eq!(gyro(1 << 5), 1.0);
        assert_eq!(compass(1 << 4), 1.0);
        assert_eq!(q2_30(-(1 << 30)), -1.0);
    }

    #[test]
    fn q16_16_round_trips_within_one_lsb() {
        let lsb = 1.0 / 65536.0;
        for x in [0.0, 1.0, -1.0, 179.99, -45.123_456, 359.5, 0.000_01, -32767.25] {
            let back = q16_16(to_q16_16(x));
            assert!((back - x).abs() <= lsb, "{x} came back as {back}");
        }
    }

    #[test]
    fn q2_30_round_trips_within_one_lsb() {
        let lsb = 1.0 / Q30;
        for x in [0.0, 0.5, -0.707_106_78, 1.0, -1.999] {
            let back = q2_30(to_q2_30(x));
            assert!((back - x).abs() <= lsb, "{x} came back as {back}");
        }
    }

    #[test]
    fn hundredths_combine_with_signed_integer() {
        assert_eq!(with_hundredths(21, 50), 21.5);
        assert!((with_hundredths(1013, 25) - 1013.25).abs() < 1e-9);
        assert!((with_hundredths(-3, 50) - -2.5).abs() < 1e-9);
    }

    #[test]
    fn connection_units() {
        assert_eq!(conn_interval_ms(6), 7.5);
        assert_eq!(conn_timeout_ms(400), 4000.0);
        assert_eq!(to_conn_interval(7.5), 6);
        assert_eq!(to_conn_timeout(4000.0), 400);
    }
}
