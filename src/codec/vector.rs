//! The peer uses a coordinate system of the opposite handedness. All vector types are swapped
//!  between Y and Z on the wire, so the in-memory values keep the local convention.

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Vector3 {
    pub const ZERO: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Vector3 {
        Vector3 { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
impl Vector3d {
    pub fn new(x: f64, y: f64, z: f64) -> Vector3d {
        Vector3d { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}
impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Quaternion {
        Quaternion { x, y, z, w }
    }

    /// Unit length with a non-negative W, which is what makes W recoverable from X, Y and Z.
    ///  A degenerate (zero length) quaternion becomes the identity.
    pub fn normalized(&self) -> Quaternion {
        let len = (self.x*self.x + self.y*self.y + self.z*self.z + self.w*self.w).sqrt();
        if !len.is_normal() {
            return Quaternion::IDENTITY;
        }

        let sign = if self.w < 0.0 { -1.0 } else { 1.0 };
        let f = sign / len;
        Quaternion::new(self.x * f, self.y * f, self.z * f, self.w * f)
    }

    /// Reconstructs W assuming a unit quaternion. Rounding can push the sum of squares slightly
    ///  above 1, so it is clamped.
    pub fn from_xyz(x: f32, y: f32, z: f32) -> Quaternion {
        let w = (1.0 - x*x - y*y - z*z).max(0.0).sqrt();
        Quaternion { x, y, z, w }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;
    use crate::codec::{BufExt, BufMutExt};

    fn assert_close(a: &Quaternion, b: &Quaternion) {
        for (l, r) in [(a.x, b.x), (a.y, b.y), (a.z, b.z), (a.w, b.w)] {
            assert!((l - r).abs() < 1e-5, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_vector3_round_trip() {
        let v = Vector3::new(128.5, -3.25, 22.0);
        let mut buf = BytesMut::new();
        buf.put_vector3(&v);
        assert_eq!(buf.freeze().read_vector3().unwrap(), v);
    }

    #[test]
    fn test_vector3d_round_trip() {
        let v = Vector3d::new(256000.125, 1.0, -7.5);
        let mut buf = BytesMut::new();
        buf.put_vector3d(&v);
        assert_eq!(buf.freeze().read_vector3d().unwrap(), v);
    }

    #[rstest]
    #[case::identity(Quaternion::IDENTITY, Quaternion::IDENTITY)]
    #[case::unnormalized(Quaternion::new(0.0, 0.0, 0.0, 5.0), Quaternion::IDENTITY)]
    #[case::negative_w(Quaternion::new(0.0, 0.0, 0.6, -0.8), Quaternion::new(0.0, 0.0, -0.6, 0.8))]
    #[case::degenerate(Quaternion::new(0.0, 0.0, 0.0, 0.0), Quaternion::IDENTITY)]
    fn test_normalized(#[case] q: Quaternion, #[case] expected: Quaternion) {
        assert_close(&q.normalized(), &expected);
    }

    #[rstest]
    #[case::identity(Quaternion::IDENTITY)]
    #[case::rotation(Quaternion::new(0.5, 0.5, 0.5, 0.5))]
    #[case::negative_w(Quaternion::new(0.36, 0.48, 0.0, -0.8))]
    #[case::unnormalized(Quaternion::new(1.0, 2.0, 3.0, 4.0))]
    fn test_quaternion_round_trip(#[case] q: Quaternion) {
        let mut buf = BytesMut::new();
        buf.put_quaternion(&q);
        assert_eq!(buf.len(), 12);
        assert_close(&buf.freeze().read_quaternion().unwrap(), &q.normalized());

        let mut buf = BytesMut::new();
        buf.put_quaternion_with_w(&q);
        assert_eq!(buf.len(), 16);
        assert_close(&buf.freeze().read_quaternion_with_w().unwrap(), &q.normalized());
    }

    #[test]
    fn test_from_xyz_clamps() {
        let q = Quaternion::from_xyz(0.8, 0.7, 0.0);
        assert_eq!(q.w, 0.0);
    }
}
