use std::time::Duration;

use drip_limit::Rate;

use crate::DripError;

const MAX_DENOMINATOR: u128 = 1000;

/// Turns a possibly fractional `limit` per `interval` into a whole number of
/// requests per interval.
///
/// The limit is approximated by the closest fraction with a denominator of at
/// most 1000; the interval is stretched by that denominator. An interval that
/// ends up below one millisecond is rescaled to whole milliseconds by raising
/// the limit instead, so `1 per 0.5ms` becomes `2 per 1ms`.
pub fn convert_rate(limit: f64, interval: Duration) -> Result<Rate, DripError> {
    let (numerator, denominator) = limit_denominator(limit, MAX_DENOMINATOR)
        .ok_or_else(|| DripError::Config(format!("unusable limit {limit}")))?;
    if numerator == 0 {
        return Err(DripError::Config(format!(
            "limit {limit} is too small to represent"
        )));
    }

    let mut limit = numerator;
    let mut interval_ms = interval.as_secs_f64() * 1000.0 * denominator as f64;
    if interval_ms < 1.0 {
        let (_, scale) = limit_denominator(interval_ms, MAX_DENOMINATOR)
            .ok_or_else(|| DripError::Config(format!("unusable interval {interval:?}")))?;
        limit *= scale;
        interval_ms *= scale as f64;
    }

    let limit = usize::try_from(limit)
        .map_err(|_| DripError::Config(format!("limit {limit} is too large")))?;
    Ok(Rate::new(
        limit,
        Duration::from_millis((interval_ms as u64).max(1)),
    ))
}

/// The closest fraction to `value` whose denominator is at most `max_denominator`.
///
/// Works on the exact binary value of the float, walking its continued
/// fraction expansion until the next convergent would exceed the bound, then
/// picks whichever of the two candidate bounds lies closer.
pub(crate) fn limit_denominator(value: f64, max_denominator: u128) -> Option<(u128, u128)> {
    let (n, d) = exact_fraction(value)?;
    if d <= max_denominator {
        return Some((n, d));
    }

    let (mut p0, mut q0, mut p1, mut q1) = (0u128, 1u128, 1u128, 0u128);
    let (mut n, mut d) = (n, d);
    loop {
        let a = n / d;
        let q2 = q0 + a * q1;
        if q2 > max_denominator {
            break;
        }
        (p0, q0, p1, q1) = (p1, q1, p0 + a * p1, q2);
        (n, d) = (d, n - a * d);
        if d == 0 {
            break;
        }
    }

    let k = (max_denominator - q0) / q1;
    let bound1 = (p0 + k * p1, q0 + k * q1);
    let bound2 = (p1, q1);
    let distance = |(p, q): (u128, u128)| (p as f64 / q as f64 - value).abs();
    if distance(bound2) <= distance(bound1) {
        Some(bound2)
    } else {
        Some(bound1)
    }
}

/// Decomposes a finite, non-negative float into `numerator / denominator`.
///
/// Values too small or too large to be meaningful rates yield `None`.
fn exact_fraction(value: f64) -> Option<(u128, u128)> {
    if !value.is_finite() || value < 0.0 || value > 1e15 {
        return None;
    }
    if value == 0.0 {
        return Some((0, 1));
    }
    if value < 1e-9 {
        // Rounds to zero under any denominator we allow
        return Some((0, 1));
    }

    let bits = value.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    let mantissa = if exponent == 0 {
        (bits & 0x000f_ffff_ffff_ffff) << 1
    } else {
        (bits & 0x000f_ffff_ffff_ffff) | 0x0010_0000_0000_0000
    };
    let shift = exponent - 1075;

    let (mut n, mut d) = if shift >= 0 {
        ((mantissa as u128) << shift, 1u128)
    } else {
        (mantissa as u128, 1u128 << (-shift))
    };
    while n % 2 == 0 && d % 2 == 0 {
        n /= 2;
        d /= 2;
    }
    Some((n, d))
}
