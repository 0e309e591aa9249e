//! Types, aliases and helper operations for doing math with `ultraviolet`.
use std::f64::consts::PI;
pub use ultraviolet as uv;

pub type Vec2 = uv::DVec2;
pub type Mat2 = uv::DMat2;

/// An angle in either degrees or radians.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum Angle {
    Rad(f64),
    Deg(f64),
}
impl Angle {
    /// Get the angle as degrees.
    #[inline]
    pub fn deg(&self) -> f64 {
        match self {
            Angle::Rad(rad) => rad * 180.0 / PI,
            Angle::Deg(deg) => *deg,
        }
    }

    /// Get the angle as radians.
    #[inline]
    pub fn rad(&self) -> f64 {
        match self {
            Angle::Rad(rad) => *rad,
            Angle::Deg(deg) => deg * PI / 180.0,
        }
    }
}
impl Default for Angle {
    fn default() -> Self {
        Angle::Rad(0.0)
    }
}
impl From<Angle> for Rot {
    #[inline]
    fn from(ang: Angle) -> Rot {
        Rot::new(ang.rad())
    }
}

/// A rotation stored as the sine and cosine of its angle.
///
/// Positive angles rotate counterclockwise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rot {
    pub sin: f64,
    pub cos: f64,
}

impl Rot {
    #[inline]
    pub fn new(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self { sin, cos }
    }

    #[inline]
    pub const fn identity() -> Self {
        Self { sin: 0.0, cos: 1.0 }
    }

    #[inline]
    pub fn angle(&self) -> f64 {
        self.sin.atan2(self.cos)
    }

    /// The inverse rotation.
    #[inline]
    pub fn reversed(&self) -> Self {
        Self {
            sin: -self.sin,
            cos: self.cos,
        }
    }

    /// Rotate a vector by the inverse of this rotation.
    #[inline]
    pub fn inv_rotate(&self, v: Vec2) -> Vec2 {
        Vec2::new(self.cos * v.x + self.sin * v.y, -self.sin * v.x + self.cos * v.y)
    }
}

impl Default for Rot {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul<Vec2> for Rot {
    type Output = Vec2;

    #[inline]
    fn mul(self, v: Vec2) -> Vec2 {
        Vec2::new(self.cos * v.x - self.sin * v.y, self.sin * v.x + self.cos * v.y)
    }
}

impl std::ops::Mul<Rot> for Rot {
    type Output = Rot;

    #[inline]
    fn mul(self, rhs: Rot) -> Rot {
        Rot {
            sin: self.sin * rhs.cos + self.cos * rhs.sin,
            cos: self.cos * rhs.cos - self.sin * rhs.sin,
        }
    }
}

impl std::ops::Mul<Unit<Vec2>> for Rot {
    type Output = Unit<Vec2>;

    fn mul(self, rhs: Unit<Vec2>) -> Self::Output {
        Unit(self * rhs.0)
    }
}

/// A Pose has a rotation and a translation, no scaling.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Pose {
    pub translation: Vec2,
    pub rotation: Rot,
}

impl Pose {
    #[inline]
    pub fn new(translation: Vec2, rotation: Rot) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    #[inline]
    pub fn identity() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inversed(&self) -> Self {
        let rotation = self.rotation.reversed();
        Self {
            translation: rotation * -self.translation,
            rotation,
        }
    }

    /// Transform a world-space point into the local space of this pose.
    #[inline]
    pub fn inv_transform_point(&self, p: Vec2) -> Vec2 {
        self.rotation.inv_rotate(p - self.translation)
    }

    /// Express `other` relative to `self`, i.e. `self.inversed() * other`.
    #[inline]
    pub fn inv_mul(&self, other: &Pose) -> Pose {
        Pose {
            translation: self.rotation.inv_rotate(other.translation - self.translation),
            rotation: self.rotation.reversed() * other.rotation,
        }
    }
}

impl std::ops::Mul<Vec2> for Pose {
    type Output = Vec2;

    #[inline]
    fn mul(self, p: Vec2) -> Vec2 {
        self.rotation * p + self.translation
    }
}

impl std::ops::Mul<Pose> for Pose {
    type Output = Pose;

    #[inline]
    fn mul(self, rhs: Pose) -> Pose {
        Pose {
            translation: self * rhs.translation,
            rotation: self.rotation * rhs.rotation,
        }
    }
}

/// A wrapper type to indicate a vector should always be normalized.
#[derive(Clone, Copy, Debug)]
pub struct Unit<T>(T);

impl Unit<Vec2> {
    pub fn new_normalize(v: Vec2) -> Self {
        Unit(v.normalized())
    }

    pub const fn new_unchecked(v: Vec2) -> Self {
        Unit(v)
    }

    pub fn unit_x() -> Self {
        Unit(Vec2::unit_x())
    }

    pub fn unit_y() -> Self {
        Unit(Vec2::unit_y())
    }

    #[inline]
    pub fn into_inner(self) -> Vec2 {
        self.0
    }
}

impl<T> std::ops::Deref for Unit<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> std::ops::Neg for Unit<T>
where
    T: std::ops::Neg,
{
    type Output = Unit<<T as std::ops::Neg>::Output>;

    fn neg(self) -> Self::Output {
        Unit(-self.0)
    }
}

// Vec2 utils

#[inline]
pub fn left_normal(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}
#[inline]
pub fn right_normal(v: Vec2) -> Vec2 {
    Vec2::new(v.y, -v.x)
}

/// The z component of the 3D cross product of two planar vectors.
#[inline]
pub fn cross(a: Vec2, b: Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Cross product of an angular quantity (pointing out of the plane) and a vector.
#[inline]
pub fn cross_sv(s: f64, v: Vec2) -> Vec2 {
    left_normal(v) * s
}

/// Cross product of a vector and an angular quantity (pointing out of the plane).
#[inline]
pub fn cross_vs(v: Vec2, s: f64) -> Vec2 {
    right_normal(v) * s
}

/// Normalize a vector, returning it unchanged along with a length of zero
/// if it's too short to normalize safely.
#[inline]
pub fn normalize_or_zero(v: Vec2) -> (Vec2, f64) {
    let len = v.mag();
    if len < f64::EPSILON {
        (Vec2::zero(), 0.0)
    } else {
        (v / len, len)
    }
}

/// Build a 2x2 matrix from its rows.
#[inline]
pub fn mat2_from_rows(r0: [f64; 2], r1: [f64; 2]) -> Mat2 {
    Mat2::new(Vec2::new(r0[0], r1[0]), Vec2::new(r0[1], r1[1]))
}

/// Solve `k * x = b` for x. A singular matrix gives a zero vector.
pub fn solve_mat2(k: &Mat2, b: Vec2) -> Vec2 {
    let [c0, c1] = k.cols;
    let (a11, a21, a12, a22) = (c0.x, c0.y, c1.x, c1.y);
    let mut det = a11 * a22 - a12 * a21;
    if det != 0.0 {
        det = 1.0 / det;
    }
    Vec2::new(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
}
