use num_complex::Complex32;

/// Unit phasor for `angle` scaled by `weight`. Angles are averaged by summing
/// these and taking the argument of the sum.
pub fn phasor(angle: f32, weight: f32) -> Complex32 {
    Complex32::from_polar(weight, angle)
}

/// Argument of an accumulated phasor sum, in (-π, π].
pub fn mean_angle(sum: Complex32) -> f32 {
    sum.im.atan2(sum.re)
}
