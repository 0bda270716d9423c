//! Rotation primitives.
//!
//! [`Quaternion`] (w, x, y, z convention) with Hamilton product, vector
//! rotation, and conversion to and from [`Euler`] angles.  Euler angles use
//! the extrinsic `x → y → z` convention (roll about the fixed X axis, then
//! pitch about fixed Y, then yaw about fixed Z), i.e.
//! `R = Rz(z) · Ry(y) · Rx(x)`.
//!
//! # Example
//!
//! ```rust
//! use loco_perception::transform::{Euler, Quaternion, Vec3};
//!
//! let q = Quaternion::from_euler(Euler::new(0.0, 0.0, std::f32::consts::FRAC_PI_2));
//! let v = q.rotate(Vec3::new(1.0, 0.0, 0.0));
//! assert!((v.y - 1.0).abs() < 1e-5);
//! ```

use loco_hal::imu::QuaternionReading;

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// World "down" direction, the gravity unit vector.
    pub fn down() -> Self {
        Self::new(0.0, 0.0, -1.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Euler
// ────────────────────────────────────────────────────────────────────────────

/// Extrinsic x-y-z Euler angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Euler {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Euler {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Reorder the axes: output axis `i` takes input axis `order[i]`.
    ///
    /// `order` must be a permutation of `[0, 1, 2]`.
    pub fn permuted(self, order: [usize; 3]) -> Self {
        let a = self.to_array();
        Self::new(a[order[0]], a[order[1]], a[order[2]])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A quaternion representing a 3-D rotation (w, x, y, z convention).
///
/// Consumers tolerate near-unit values; use [`Quaternion::normalized`] to
/// project a raw reading onto the unit sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians about the unit axis `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self::new(c, axis.x * s, axis.y * s, axis.z * s)
    }

    pub fn norm(self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit-norm copy, or `None` for a zero or non-finite quaternion.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if !n.is_finite() || n < 1e-6 {
            return None;
        }
        Some(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    /// Hamilton product: `self` applied after `rhs`.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    fn vector(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Rotate `v` from body frame into world frame: `q · v · q*`.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Rotate `v` from world frame into body frame: `q* · v · q`.
    ///
    /// Closed form that stays well-behaved for near-unit quaternions.
    pub fn rotate_inverse(self, v: Vec3) -> Vec3 {
        let u = self.vector();
        let a = v.scale(2.0 * self.w * self.w - 1.0);
        let b = u.cross(v).scale(2.0 * self.w);
        let c = u.scale(2.0 * u.dot(v));
        a.sub(b).add(c)
    }

    /// Build from extrinsic x-y-z Euler angles: `q = qz · qy · qx`.
    pub fn from_euler(e: Euler) -> Self {
        let (sx, cx) = (e.x * 0.5).sin_cos();
        let (sy, cy) = (e.y * 0.5).sin_cos();
        let (sz, cz) = (e.z * 0.5).sin_cos();
        Self::new(
            cx * cy * cz + sx * sy * sz,
            sx * cy * cz - cx * sy * sz,
            cx * sy * cz + sx * cy * sz,
            cx * cy * sz - sx * sy * cz,
        )
    }

    /// Decompose into extrinsic x-y-z Euler angles.
    ///
    /// The y angle is in `[-π/2, π/2]`; at gimbal lock the x/z split is
    /// arbitrary but the composed rotation is preserved.
    pub fn to_euler(self) -> Euler {
        let Self { w, x, y, z } = self;
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        Euler::new(roll, pitch, yaw)
    }
}

impl From<QuaternionReading> for Quaternion {
    fn from(r: QuaternionReading) -> Self {
        Self::new(r.w, r.x, r.y, r.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
