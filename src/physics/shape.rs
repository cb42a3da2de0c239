use crate::physics::Vector2;
use serde::{Deserialize, Serialize};

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub min: Vector2,
    pub max: Vector2,
}

impl Aabb {
    pub fn new(min: Vector2, max: Vector2) -> Self {
        Self { min, max }
    }

    /// 重叠测试，`epsilon` 为允许的间隙
    pub fn overlaps(&self, other: &Aabb, epsilon: f64) -> bool {
        self.min.x - epsilon <= other.max.x
            && other.min.x - epsilon <= self.max.x
            && self.min.y - epsilon <= other.max.y
            && other.min.y - epsilon <= self.max.y
    }

    pub fn contains(&self, point: Vector2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }
}

/// 碰撞形状（局部坐标，以质心为原点）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Circle { radius: f64 },
    /// 有向矩形，随刚体旋转
    Rect { width: f64, height: f64 },
}

impl Shape {
    pub fn circle(radius: f64) -> Self {
        Shape::Circle { radius }
    }

    pub fn rect(width: f64, height: f64) -> Self {
        Shape::Rect { width, height }
    }

    pub fn area(&self) -> f64 {
        match *self {
            Shape::Circle { radius } => std::f64::consts::PI * radius * radius,
            Shape::Rect { width, height } => width * height,
        }
    }

    /// 绕质心的转动惯量
    pub fn inertia(&self, mass: f64) -> f64 {
        match *self {
            Shape::Circle { radius } => 0.5 * mass * radius * radius,
            Shape::Rect { width, height } => mass * (width * width + height * height) / 12.0,
        }
    }

    /// 在 `position`、转角 `angle` 处的包围盒
    pub fn aabb(&self, position: Vector2, angle: f64) -> Aabb {
        let extent = match *self {
            Shape::Circle { radius } => Vector2::new(radius, radius),
            Shape::Rect { width, height } => {
                let (sin, cos) = angle.sin_cos();
                let (hx, hy) = (width * 0.5, height * 0.5);
                Vector2::new(cos.abs() * hx + sin.abs() * hy, sin.abs() * hx + cos.abs() * hy)
            }
        };
        Aabb::new(position - extent, position + extent)
    }
}
