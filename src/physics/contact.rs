//! 接触约束与顺序冲量求解
//!
//! 接触在每次检测时重新生成，不跨步保留。法向从 A 指向 B。

use crate::core::WorldConfig;
use crate::physics::{Body, Vector2};

/// 接触点
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// 刚体在世界列表中的下标，只在本次 update 内有效
    pub body_a: usize,
    pub body_b: usize,
    pub point: Vector2,
    pub normal: Vector2,
    pub penetration: f64,
    pub restitution: f64,
    pub friction: f64,
    /// 法向、切向累计冲量
    pub accumulated_normal: f64,
    pub accumulated_tangent: f64,
    /// 位置修正的累计冲量（只作用于偏置速度）
    pub accumulated_split: f64,
    /// 反弹目标速度，生成接触时由接近速度确定
    velocity_bias: f64,
}

impl Contact {
    pub fn new(
        (index_a, a): (usize, &Body),
        (index_b, b): (usize, &Body),
        point: Vector2,
        normal: Vector2,
        penetration: f64,
        config: &WorldConfig,
    ) -> Self {
        let restitution = a.restitution.max(b.restitution);
        let friction = (a.friction * b.friction).sqrt();
        let (ra, rb) = (point - a.position, point - b.position);
        let approach = (b.velocity_at(rb) - a.velocity_at(ra)).dot(normal);
        let velocity_bias = if approach < -config.restitution_threshold {
            -restitution * approach
        } else {
            0.0
        };
        Self {
            body_a: index_a,
            body_b: index_b,
            point,
            normal,
            penetration,
            restitution,
            friction,
            accumulated_normal: 0.0,
            accumulated_tangent: 0.0,
            accumulated_split: 0.0,
            velocity_bias,
        }
    }

    /// 累计的总冲量（世界坐标）
    pub fn accumulated_impulse(&self) -> Vector2 {
        self.normal * self.accumulated_normal + self.normal.perpendicular() * self.accumulated_tangent
    }

    pub fn accumulated_split_impulse(&self) -> Vector2 {
        self.normal * self.accumulated_split
    }

    pub(crate) fn reset_accumulators(&mut self) {
        self.accumulated_normal = 0.0;
        self.accumulated_tangent = 0.0;
        self.accumulated_split = 0.0;
    }
}

/// 同时可变借用两个不同的刚体
pub(crate) fn pair_mut(bodies: &mut [Body], i: usize, j: usize) -> Option<(&mut Body, &mut Body)> {
    if i == j || i >= bodies.len() || j >= bodies.len() {
        return None;
    }
    if i < j {
        let (left, right) = bodies.split_at_mut(j);
        Some((&mut left[i], &mut right[0]))
    } else {
        let (left, right) = bodies.split_at_mut(i);
        Some((&mut right[0], &mut left[j]))
    }
}

/// 沿方向 `dir` 的有效质量
fn effective_mass(a: &Body, b: &Body, ra: Vector2, rb: Vector2, dir: Vector2) -> f64 {
    let rna = ra.cross(dir);
    let rnb = rb.cross(dir);
    let k = a.inverse_mass() + b.inverse_mass() + a.inverse_inertia() * rna * rna + b.inverse_inertia() * rnb * rnb;
    if k > 0.0 {
        1.0 / k
    } else {
        0.0
    }
}

/// 顺序冲量接触求解器
pub struct ConstraintSolver;

impl ConstraintSolver {
    /// 位置修正冲量：把残余穿透转换为偏置速度
    pub fn apply_contact(bodies: &mut [Body], contact: &mut Contact, step: f64, config: &WorldConfig) {
        let Some((a, b)) = pair_mut(bodies, contact.body_a, contact.body_b) else {
            return;
        };
        let (ra, rb) = (contact.point - a.position, contact.point - b.position);
        let mass = effective_mass(a, b, ra, rb, contact.normal);
        if mass == 0.0 || step <= 0.0 {
            return;
        }

        let target = config.bias_factor / step * (contact.penetration - config.allowed_penetration).max(0.0);
        let relative = (b.bias_velocity_at(rb) - a.bias_velocity_at(ra)).dot(contact.normal);
        let lambda = mass * (target - relative);

        let previous = contact.accumulated_split;
        contact.accumulated_split = (previous + lambda).max(0.0);
        let impulse = contact.normal * (contact.accumulated_split - previous);
        a.apply_bias_impulse(-impulse, ra);
        b.apply_bias_impulse(impulse, rb);
    }

    /// 速度约束：法向不可穿透 + 库仑摩擦
    pub fn solve_contact(bodies: &mut [Body], contact: &mut Contact) {
        let Some((a, b)) = pair_mut(bodies, contact.body_a, contact.body_b) else {
            return;
        };
        let (ra, rb) = (contact.point - a.position, contact.point - b.position);
        let normal = contact.normal;

        let normal_mass = effective_mass(a, b, ra, rb, normal);
        if normal_mass == 0.0 {
            return;
        }
        let vn = (b.velocity_at(rb) - a.velocity_at(ra)).dot(normal);
        let lambda = normal_mass * (contact.velocity_bias - vn);
        let previous = contact.accumulated_normal;
        contact.accumulated_normal = (previous + lambda).max(0.0);
        let impulse = normal * (contact.accumulated_normal - previous);
        a.apply_impulse(-impulse, ra);
        b.apply_impulse(impulse, rb);

        let tangent = normal.perpendicular();
        let tangent_mass = effective_mass(a, b, ra, rb, tangent);
        if tangent_mass == 0.0 {
            return;
        }
        let vt = (b.velocity_at(rb) - a.velocity_at(ra)).dot(tangent);
        let limit = contact.friction * contact.accumulated_normal;
        let previous = contact.accumulated_tangent;
        contact.accumulated_tangent = (previous - tangent_mass * vt).clamp(-limit, limit);
        let impulse = tangent * (contact.accumulated_tangent - previous);
        a.apply_impulse(-impulse, ra);
        b.apply_impulse(impulse, rb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Shape;

    fn head_on(speed: f64, restitution: f64) -> (Vec<Body>, Contact) {
        let a = Body::new(Shape::circle(1.0), 1.0, Vector2::new(0.0, 0.0))
            .with_velocity(Vector2::new(speed, 0.0))
            .with_material(restitution, 0.0);
        let b = Body::new(Shape::circle(1.0), 1.0, Vector2::new(1.9, 0.0))
            .with_velocity(Vector2::new(-speed, 0.0))
            .with_material(restitution, 0.0);
        let contact = Contact::new(
            (0, &a),
            (1, &b),
            Vector2::new(0.95, 0.0),
            Vector2::new(1.0, 0.0),
            0.1,
            &WorldConfig::default(),
        );
        (vec![a, b], contact)
    }

    #[test]
    fn test_inelastic_contact_stops_approach() {
        let (mut bodies, mut contact) = head_on(2.0, 0.0);
        ConstraintSolver::solve_contact(&mut bodies, &mut contact);
        let relative = bodies[1].linear_velocity.x - bodies[0].linear_velocity.x;
        assert!(relative.abs() < 1e-9);
        assert!(contact.accumulated_normal > 0.0);
    }

    #[test]
    fn test_elastic_contact_reverses_velocity() {
        let (mut bodies, mut contact) = head_on(2.0, 1.0);
        ConstraintSolver::solve_contact(&mut bodies, &mut contact);
        assert!((bodies[0].linear_velocity.x + 2.0).abs() < 1e-9);
        assert!((bodies[1].linear_velocity.x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_separating_bodies_get_no_impulse() {
        let (mut bodies, mut contact) = head_on(-1.0, 0.0);
        ConstraintSolver::solve_contact(&mut bodies, &mut contact);
        assert_eq!(contact.accumulated_normal, 0.0);
        assert_eq!(bodies[0].linear_velocity.x, -1.0);
    }

    #[test]
    fn test_split_impulse_only_touches_bias_velocity() {
        let (mut bodies, mut contact) = head_on(0.0, 0.0);
        ConstraintSolver::apply_contact(&mut bodies, &mut contact, 1.0 / 60.0, &WorldConfig::default());
        assert!(contact.accumulated_split > 0.0);
        assert!(bodies[0].bias_linear_velocity.x < 0.0);
        assert!(bodies[1].bias_linear_velocity.x > 0.0);
        assert_eq!(bodies[0].linear_velocity, Vector2::ZERO);
    }
}
