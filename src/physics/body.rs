use crate::physics::{Aabb, Shape, Vector2};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BODY_ID: AtomicU64 = AtomicU64::new(1);

/// 刚体身份标识，创建时分配；克隆的刚体共享同一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(u64);

impl BodyId {
    fn next() -> Self {
        BodyId(NEXT_BODY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// 刚体
///
/// 质量不为正的刚体按静态处理。
#[derive(Debug, Clone)]
pub struct Body {
    id: BodyId,
    pub position: Vector2,
    /// 转角（弧度，逆时针）
    pub angle: f64,
    pub linear_velocity: Vector2,
    pub angular_velocity: f64,
    mass: f64,
    inverse_mass: f64,
    inverse_inertia: f64,
    is_static: bool,
    shape: Shape,
    pub restitution: f64,
    pub friction: f64,
    /// 只用于位置修正的偏置速度，不计入物理速度
    pub(crate) bias_linear_velocity: Vector2,
    pub(crate) bias_angular_velocity: f64,
    aabb: Aabb,
}

impl Body {
    pub fn new(shape: Shape, mass: f64, position: Vector2) -> Self {
        if mass <= 0.0 || !mass.is_finite() {
            return Self::new_static(shape, position);
        }
        let inertia = shape.inertia(mass);
        Self {
            inverse_mass: 1.0 / mass,
            inverse_inertia: if inertia > 0.0 { 1.0 / inertia } else { 0.0 },
            mass,
            is_static: false,
            ..Self::new_static(shape, position)
        }
    }

    pub fn new_static(shape: Shape, position: Vector2) -> Self {
        Self {
            id: BodyId::next(),
            position,
            angle: 0.0,
            linear_velocity: Vector2::ZERO,
            angular_velocity: 0.0,
            mass: 0.0,
            inverse_mass: 0.0,
            inverse_inertia: 0.0,
            is_static: true,
            shape,
            restitution: 0.0,
            friction: 0.3,
            bias_linear_velocity: Vector2::ZERO,
            bias_angular_velocity: 0.0,
            aabb: shape.aabb(position, 0.0),
        }
    }

    pub fn with_velocity(mut self, velocity: Vector2) -> Self {
        if !self.is_static {
            self.linear_velocity = velocity;
        }
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self.update_aabb();
        self
    }

    pub fn with_material(mut self, restitution: f64, friction: f64) -> Self {
        self.restitution = restitution.clamp(0.0, 1.0);
        self.friction = friction.max(0.0);
        self
    }

    pub fn id(&self) -> BodyId {
        self.id
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn inverse_mass(&self) -> f64 {
        self.inverse_mass
    }

    pub fn inverse_inertia(&self) -> f64 {
        self.inverse_inertia
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    /// 按当前位置重算包围盒
    pub fn update_aabb(&mut self) {
        self.aabb = self.shape.aabb(self.position, self.angle);
    }

    /// 局部坐标 → 世界坐标
    pub fn world_point(&self, local: Vector2) -> Vector2 {
        self.position + local.rotate(self.angle)
    }

    /// 世界坐标 → 局部坐标
    pub fn local_point(&self, world: Vector2) -> Vector2 {
        (world - self.position).rotate(-self.angle)
    }

    /// 质心偏移 `r` 处的速度
    pub fn velocity_at(&self, r: Vector2) -> Vector2 {
        self.linear_velocity + Vector2::cross_scalar(self.angular_velocity, r)
    }

    pub(crate) fn bias_velocity_at(&self, r: Vector2) -> Vector2 {
        self.bias_linear_velocity + Vector2::cross_scalar(self.bias_angular_velocity, r)
    }

    pub fn apply_impulse(&mut self, impulse: Vector2, r: Vector2) {
        self.linear_velocity += impulse * self.inverse_mass;
        self.angular_velocity += self.inverse_inertia * r.cross(impulse);
    }

    pub(crate) fn apply_bias_impulse(&mut self, impulse: Vector2, r: Vector2) {
        self.bias_linear_velocity += impulse * self.inverse_mass;
        self.bias_angular_velocity += self.inverse_inertia * r.cross(impulse);
    }

    pub(crate) fn clear_bias(&mut self) {
        self.bias_linear_velocity = Vector2::ZERO;
        self.bias_angular_velocity = 0.0;
    }

    /// 自由运动：重力和阻尼作用到速度
    pub(crate) fn free_update_velocity(&mut self, gravity: Vector2, damping: f64, step: f64) {
        if self.is_static {
            return;
        }
        self.linear_velocity += gravity * step;
        if damping > 0.0 {
            let keep = (1.0 - damping * step).max(0.0);
            self.linear_velocity = self.linear_velocity * keep;
            self.angular_velocity *= keep;
        }
    }

    /// 用最终速度推进位置
    pub(crate) fn free_update_position(&mut self, step: f64) {
        if self.is_static {
            return;
        }
        self.position += self.linear_velocity * step;
        self.angle += self.angular_velocity * step;
    }

    /// 用偏置速度修正位置
    pub(crate) fn correct_position(&mut self, step: f64) {
        if self.is_static {
            return;
        }
        self.position += self.bias_linear_velocity * step;
        self.angle += self.bias_angular_velocity * step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_identity() {
        let a = Body::new(Shape::circle(1.0), 1.0, Vector2::ZERO);
        let b = Body::new(Shape::circle(1.0), 1.0, Vector2::ZERO);
        assert_eq!(a.clone().id(), a.id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_non_positive_mass_is_static() {
        let body = Body::new(Shape::rect(1.0, 1.0), 0.0, Vector2::ZERO).with_velocity(Vector2::new(1.0, 0.0));
        assert!(body.is_static());
        assert_eq!(body.inverse_mass(), 0.0);
        assert_eq!(body.linear_velocity, Vector2::ZERO);
    }

    #[test]
    fn test_off_center_impulse_spins() {
        let mut body = Body::new(Shape::rect(2.0, 2.0), 2.0, Vector2::ZERO);
        body.apply_impulse(Vector2::new(0.0, 2.0), Vector2::new(1.0, 0.0));
        assert!(body.linear_velocity.approx_eq(Vector2::new(0.0, 1.0), 1e-12));
        // I = m(w²+h²)/12 = 4/3
        assert!((body.angular_velocity - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_world_local_roundtrip_under_rotation() {
        let body = Body::new(Shape::rect(1.0, 1.0), 1.0, Vector2::new(3.0, 1.0)).with_angle(0.7);
        let local = Vector2::new(0.25, -0.5);
        assert!(body.local_point(body.world_point(local)).approx_eq(local, 1e-12));
    }
}
