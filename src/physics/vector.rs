use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// 二维向量（值类型）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y
    }

    /// 二维叉积（z 分量）
    pub fn cross(self, rhs: Self) -> f64 {
        self.x * rhs.y - self.y * rhs.x
    }

    /// 标量 × 向量：角速度 `w` 叉乘半径 `self`
    pub fn cross_scalar(w: f64, r: Self) -> Self {
        Self::new(-w * r.y, w * r.x)
    }

    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    /// 单位向量；零向量原样返回
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len <= f64::EPSILON {
            self
        } else {
            self / len
        }
    }

    /// 逆时针旋转 90°
    pub fn perpendicular(self) -> Self {
        Self::new(-self.y, self.x)
    }

    pub fn rotate(self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    pub fn distance_to(self, other: Self) -> f64 {
        (other - self).length()
    }

    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs())
    }

    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y))
    }

    pub fn approx_eq(self, other: Self, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon && (self.y - other.y).abs() <= epsilon
    }
}

impl Add for Vector2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vector2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vector2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f64> for Vector2 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Mul<Vector2> for f64 {
    type Output = Vector2;
    fn mul(self, rhs: Vector2) -> Vector2 {
        rhs * self
    }
}

impl Div<f64> for Vector2 {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl Neg for Vector2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_products() {
        let a = Vector2::new(3.0, 4.0);
        let b = Vector2::new(-2.0, 1.0);
        assert_eq!(a.dot(b), -2.0);
        assert_eq!(a.cross(b), 11.0);
        assert_eq!(a.length(), 5.0);
        assert_eq!(Vector2::cross_scalar(2.0, Vector2::new(1.0, 0.0)), Vector2::new(0.0, 2.0));
    }

    #[test]
    fn test_normalize_zero_is_noop() {
        assert_eq!(Vector2::ZERO.normalize(), Vector2::ZERO);
        assert!((Vector2::new(0.0, 7.0).normalize().y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let v = Vector2::new(1.0, 0.0).rotate(std::f64::consts::FRAC_PI_2);
        assert!(v.approx_eq(Vector2::new(0.0, 1.0), 1e-12));
        assert_eq!(Vector2::new(1.0, 2.0).perpendicular(), Vector2::new(-2.0, 1.0));
    }
}
