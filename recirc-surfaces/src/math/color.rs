// Copyright 2020-2021 Kevin Reid under the terms of the MIT License as detailed
// in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Linear RGB color values for the output textures. This module is private but
//! reexported by its parent.

use cgmath::Vector3;
pub use ordered_float::NotNan;
use std::ops::{Add, AddAssign, Mul, Sub};

use super::FreeCoordinate;

/// Allows writing a constant [`Rgb`] color value, provided that its components are float
/// literals.
#[macro_export]
macro_rules! rgb_const {
    ($r:literal, $g:literal, $b:literal) => {
        unsafe {
            // Safety: Only literal values are allowed, which will either be a non-NaN
            // float or a type mismatch.
            $crate::math::Rgb::new_nn(
                $crate::math::NotNan::unchecked_new($r),
                $crate::math::NotNan::unchecked_new($g),
                $crate::math::NotNan::unchecked_new($b),
            )
        }
    };
}

/// A linear RGB color value: what the color maps emit, what the textures store,
/// and what the reflectance model scales and sums.
///
/// * Components are `f32`; the geometry and timing math of the crate is `f64`,
///   but eight-bit image output does not warrant doubles for color.
/// * Components nominally lie in `[0, 1]`. Reflectance sums may overshoot;
///   values are only clamped when quantizing to image bytes.
/// * NaN is banned (so results stay [`Eq`]-comparable); infinities are not.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Rgb(Vector3<NotNan<f32>>);

// NotNan's zero() and one() exist only via traits, which can't be used in const
// position.
const NN0: NotNan<f32> = unsafe { NotNan::unchecked_new(0.0) };
const NN1: NotNan<f32> = unsafe { NotNan::unchecked_new(1.0) };

impl Rgb {
    /// Black.
    pub const ZERO: Rgb = Rgb(Vector3::new(NN0, NN0, NN0));
    /// White (unity brightness).
    pub const ONE: Rgb = Rgb(Vector3::new(NN1, NN1, NN1));

    /// Constructs a color from components. Panics if any component is NaN; no
    /// range checks are performed.
    #[inline]
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        let component = |v: f32| NotNan::new(v).expect("Color components may not be NaN");
        Self(Vector3::new(component(r), component(g), component(b)))
    }

    /// Constructs a color from components that have already been checked for not being
    /// NaN. Exists primarily to assist the [`rgb_const!`] macro.
    #[inline]
    pub const fn new_nn(r: NotNan<f32>, g: NotNan<f32>, b: NotNan<f32>) -> Self {
        Self(Vector3::new(r, g, b))
    }

    /// Returns the red color component.
    #[inline]
    pub const fn red(self) -> NotNan<f32> {
        self.0.x
    }
    /// Returns the green color component.
    #[inline]
    pub const fn green(self) -> NotNan<f32> {
        self.0.y
    }
    /// Returns the blue color component.
    #[inline]
    pub const fn blue(self) -> NotNan<f32> {
        self.0.z
    }

    /// Componentwise interpolation from `self` (at 0) to `other` (at 1).
    ///
    /// The blend amount is a [`FreeCoordinate`] because the callers are the
    /// bilinear texture sampler and the color maps, whose coordinates are.
    #[inline]
    pub fn lerp(self, other: Rgb, amount: FreeCoordinate) -> Rgb {
        self * (1.0 - amount) + other * amount
    }

    /// Quantizes to the 8-bit channels of the PPM writer: components are
    /// clamped to the nominal range and rounded to the nearest byte value. No
    /// gamma correction is applied (the files store linear values).
    #[inline]
    pub fn to_bytes(self) -> [u8; 3] {
        #[inline]
        fn quantize(component: NotNan<f32>) -> u8 {
            (component.into_inner().clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [quantize(self.red()), quantize(self.green()), quantize(self.blue())]
    }

    /// Inverse of [`Self::to_bytes`] up to quantization error.
    #[inline]
    pub fn from_bytes([r, g, b]: [u8; 3]) -> Self {
        #[inline]
        fn dequantize(byte: u8) -> NotNan<f32> {
            NotNan::new(f32::from(byte) / 255.0).unwrap()
        }
        Self(Vector3::new(dequantize(r), dequantize(g), dequantize(b)))
    }
}

impl Add<Rgb> for Rgb {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}
impl AddAssign<Rgb> for Rgb {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}
impl Sub<Rgb> for Rgb {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

/// Componentwise color modulation (surface albedo times incident light).
impl Mul<Rgb> for Rgb {
    type Output = Self;
    fn mul(self, other: Rgb) -> Self {
        Self(Vector3::new(
            self.0.x * other.0.x,
            self.0.y * other.0.y,
            self.0.z * other.0.z,
        ))
    }
}

/// Scales by a [`FreeCoordinate`] factor, so the `f64` reflectance coefficients
/// and light intensities apply directly. Panics if the factor is NaN.
impl Mul<FreeCoordinate> for Rgb {
    type Output = Self;
    fn mul(self, scalar: FreeCoordinate) -> Self {
        let scalar = NotNan::new(scalar as f32).expect("Color scale factor may not be NaN");
        Self(self.0 * scalar)
    }
}

impl std::fmt::Debug for Rgb {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "Rgb({:?}, {:?}, {:?})",
            self.red().into_inner(),
            self.green().into_inner(),
            self.blue().into_inner()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_quantization_rounds_and_clamps() {
        assert_eq!(Rgb::new(0.125, 0.25, 0.5).to_bytes(), [32, 64, 128]);
        assert_eq!(Rgb::ZERO.to_bytes(), [0, 0, 0]);
        assert_eq!(Rgb::ONE.to_bytes(), [255, 255, 255]);
        // Overshooting reflectance sums and negative values clamp.
        assert_eq!(Rgb::new(-1.0, 10.0, 1.0).to_bytes(), [0, 255, 255]);
    }

    #[test]
    fn bytes_round_trip() {
        for &bytes in &[[0u8, 0, 0], [32, 64, 128], [255, 1, 254]] {
            assert_eq!(Rgb::from_bytes(bytes).to_bytes(), bytes);
        }
    }

    #[test]
    fn lerp_endpoints_and_midpoint() {
        let a = Rgb::new(0.0, 0.5, 1.0);
        let b = Rgb::new(1.0, 0.5, 0.0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        let mid = a.lerp(b, 0.5);
        assert!((mid.red().into_inner() - 0.5).abs() < 1e-6);
        assert!((mid.blue().into_inner() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn free_coordinate_scaling() {
        let scaled = Rgb::ONE * 0.6;
        assert!((scaled.red().into_inner() - 0.6).abs() < 1e-6);
        // The reflectance path scales by f64 coefficients without casts.
        let coefficient: FreeCoordinate = 0.25;
        assert_eq!(Rgb::new(1.0, 0.5, 0.0) * coefficient, Rgb::new(0.25, 0.125, 0.0));
    }

    #[test]
    fn componentwise_modulation() {
        let albedo = Rgb::new(0.5, 1.0, 0.0);
        let light = Rgb::new(1.0, 0.5, 0.5);
        assert_eq!(albedo * light, Rgb::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn rgb_debug() {
        assert_eq!(
            format!("{:#?}", Rgb::new(0.1, 0.2, 0.3)),
            "Rgb(0.1, 0.2, 0.3)"
        );
    }
}
