//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value between `min` and `max`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T 
where
    T: Float
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Floor the magnitude of `value` to `epsilon`, keeping its sign.
///
/// Used to keep denominators away from zero. Zero is floored to `+epsilon`.
pub fn floor_magnitude<T>(value: T, epsilon: T) -> T
where
    T: Float
{
    if value.abs() >= epsilon {
        value
    }
    else if value < T::zero() {
        -epsilon
    }
    else {
        epsilon
    }
}
