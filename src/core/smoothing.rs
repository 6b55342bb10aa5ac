//! Exponential Smoothing
//!
//! Shadow entities are drawn every frame but only receive new targets every
//! broadcast interval. Instead of snapping, each frame moves the current value
//! a fixed fraction `alpha` of the way toward the target:
//!
//! ```text
//! next = current + (target - current) * alpha
//! ```
//!
//! The residual error after `n` frames is `(1 - alpha)^n` of the starting
//! error, so convergence to within `epsilon` takes
//! `ln(epsilon) / ln(1 - alpha)` frames.

use std::f32::consts::{PI, TAU};

use super::vec2::Vec2;

/// Blend a scalar toward a target.
#[inline]
pub fn blend(current: f32, target: f32, alpha: f32) -> f32 {
    current + (target - current) * alpha
}

/// Blend a vector toward a target.
#[inline]
pub fn blend_vec(current: Vec2, target: Vec2, alpha: f32) -> Vec2 {
    current.lerp(target, alpha)
}

/// Wrap an angle into `[-PI, PI)`.
#[inline]
pub fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Signed shortest rotation taking `from` to `to`, in `[-PI, PI)`.
#[inline]
pub fn shortest_angle_delta(from: f32, to: f32) -> f32 {
    wrap_angle(to - from)
}

/// Blend an angle toward a target along the shortest arc.
///
/// Blending 3.1 toward -3.1 moves forward through PI instead of spinning
/// back through zero.
#[inline]
pub fn blend_angle(current: f32, target: f32, alpha: f32) -> f32 {
    current + shortest_angle_delta(current, target) * alpha
}

/// Frames needed for the residual error fraction to drop below `epsilon`.
///
/// Returns `None` when `alpha` is outside `(0, 1]` or `epsilon` outside
/// `(0, 1)`.
pub fn frames_to_converge(alpha: f32, epsilon: f32) -> Option<u32> {
    if !(alpha > 0.0 && alpha <= 1.0) || !(epsilon > 0.0 && epsilon < 1.0) {
        return None;
    }
    if alpha >= 1.0 {
        return Some(1);
    }
    let frames = (epsilon.ln() / (1.0 - alpha).ln()).ceil();
    Some(frames as u32)
}

// =============================================================================
// TESTS
// =============================================================================
