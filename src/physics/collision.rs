//! 碰撞检测：宽阶段 AABB 重叠 + 窄阶段精确测试

use crate::core::WorldConfig;
use crate::physics::{Body, Contact, Shape, Vector2};

/// 碰撞检测器
pub struct CollisionDetector;

impl CollisionDetector {
    /// 重算包围盒并枚举所有刚体对，把接触追加到 `contacts`
    ///
    /// 枚举顺序与刚体列表顺序一致；两个静态刚体之间不检测。
    pub fn detect(bodies: &mut [Body], contacts: &mut Vec<Contact>, config: &WorldConfig) {
        for body in bodies.iter_mut() {
            body.update_aabb();
        }
        let bodies: &[Body] = bodies;
        for i in 0..bodies.len() {
            for j in i + 1..bodies.len() {
                let (a, b) = (&bodies[i], &bodies[j]);
                if a.is_static() && b.is_static() {
                    continue;
                }
                if a.aabb().overlaps(b.aabb(), config.aabb_epsilon) {
                    Self::collide((i, a), (j, b), contacts, config);
                }
            }
        }
    }

    /// 窄阶段：按形状组合分派
    pub fn collide(a: (usize, &Body), b: (usize, &Body), contacts: &mut Vec<Contact>, config: &WorldConfig) {
        let manifold = match (*a.1.shape(), *b.1.shape()) {
            (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => circle_circle(a.1, ra, b.1, rb),
            (Shape::Circle { radius }, Shape::Rect { width, height }) => {
                circle_rect(a.1, radius, b.1, width, height, false)
            }
            (Shape::Rect { width, height }, Shape::Circle { radius }) => {
                circle_rect(b.1, radius, a.1, width, height, true)
            }
            (Shape::Rect { width: wa, height: ha }, Shape::Rect { width: wb, height: hb }) => {
                rect_rect(a.1, Vector2::new(wa, ha) * 0.5, b.1, Vector2::new(wb, hb) * 0.5)
            }
        };
        for (point, normal, penetration) in manifold {
            contacts.push(Contact::new(a, b, point, normal, penetration, config));
        }
    }
}

/// (接触点, A→B 法向, 穿透深度)
type ContactPoint = (Vector2, Vector2, f64);

fn circle_circle(a: &Body, ra: f64, b: &Body, rb: f64) -> Vec<ContactPoint> {
    let delta = b.position - a.position;
    let distance = delta.length();
    let reach = ra + rb;
    if distance >= reach {
        return Vec::new();
    }
    let normal = if distance > f64::EPSILON {
        delta / distance
    } else {
        Vector2::new(1.0, 0.0)
    };
    let penetration = reach - distance;
    vec![(a.position + normal * (ra - penetration * 0.5), normal, penetration)]
}

/// 圆与有向矩形；`rect_first` 为真时 A 是矩形
fn circle_rect(
    circle: &Body,
    radius: f64,
    rect: &Body,
    width: f64,
    height: f64,
    rect_first: bool,
) -> Vec<ContactPoint> {
    let half = Vector2::new(width * 0.5, height * 0.5);
    let center = rect.local_point(circle.position);
    let clamped = Vector2::new(center.x.clamp(-half.x, half.x), center.y.clamp(-half.y, half.y));

    // 局部坐标下由矩形指向圆心的法向
    let (local_normal, penetration, local_point) = if clamped == center {
        // 圆心在矩形内部：沿最近的面推出
        let dx = half.x - center.x.abs();
        let dy = half.y - center.y.abs();
        if dx < dy {
            let sign = if center.x < 0.0 { -1.0 } else { 1.0 };
            (Vector2::new(sign, 0.0), radius + dx, Vector2::new(sign * half.x, center.y))
        } else {
            let sign = if center.y < 0.0 { -1.0 } else { 1.0 };
            (Vector2::new(0.0, sign), radius + dy, Vector2::new(center.x, sign * half.y))
        }
    } else {
        let offset = center - clamped;
        let distance = offset.length();
        if distance >= radius {
            return Vec::new();
        }
        (offset / distance, radius - distance, clamped)
    };

    let normal = local_normal.rotate(rect.angle);
    let point = rect.world_point(local_point);
    if rect_first {
        vec![(point, normal, penetration)]
    } else {
        vec![(point, -normal, penetration)]
    }
}

/// 有向矩形的两条轴
fn axes(body: &Body) -> [Vector2; 2] {
    let x = Vector2::new(1.0, 0.0).rotate(body.angle);
    [x, x.perpendicular()]
}

/// 矩形在轴上的投影半径
fn projected_radius(axes: &[Vector2; 2], half: Vector2, axis: Vector2) -> f64 {
    half.x * axes[0].dot(axis).abs() + half.y * axes[1].dot(axis).abs()
}

/// 保留 `dot(n, v) <= offset` 的部分
fn clip_segment(segment: [Vector2; 2], n: Vector2, offset: f64) -> Option<[Vector2; 2]> {
    let d0 = n.dot(segment[0]) - offset;
    let d1 = n.dot(segment[1]) - offset;
    match (d0 <= 0.0, d1 <= 0.0) {
        (true, true) => Some(segment),
        (false, false) => None,
        _ => {
            let t = d0 / (d0 - d1);
            let cut = segment[0] + (segment[1] - segment[0]) * t;
            if d0 <= 0.0 {
                Some([segment[0], cut])
            } else {
                Some([cut, segment[1]])
            }
        }
    }
}

/// 分离轴测试 + 参考面裁剪，最多两个接触点
fn rect_rect(a: &Body, half_a: Vector2, b: &Body, half_b: Vector2) -> Vec<ContactPoint> {
    let axes_a = axes(a);
    let axes_b = axes(b);
    let delta = b.position - a.position;

    // (重叠量, 轴, 轴属于 A, 轴序号)
    let mut best: Option<(f64, Vector2, bool, usize)> = None;
    for (owner_is_a, owner_axes) in [(true, &axes_a), (false, &axes_b)] {
        for (k, &axis) in owner_axes.iter().enumerate() {
            let overlap = projected_radius(&axes_a, half_a, axis) + projected_radius(&axes_b, half_b, axis)
                - delta.dot(axis).abs();
            if overlap < 0.0 {
                return Vec::new();
            }
            // A 的轴优先，避免参考面在相等时来回切换
            let better = match best {
                None => true,
                Some((current, ..)) => overlap < current - 1e-9,
            };
            if better {
                best = Some((overlap, axis, owner_is_a, k));
            }
        }
    }
    let Some((_, axis, reference_is_a, k)) = best else {
        return Vec::new();
    };
    let normal = if delta.dot(axis) < 0.0 { -axis } else { axis };

    let (reference, ref_axes, ref_half, incident, inc_axes, inc_half, ref_normal) = if reference_is_a {
        (a, axes_a, half_a, b, axes_b, half_b, normal)
    } else {
        (b, axes_b, half_b, a, axes_a, half_a, -normal)
    };
    let ref_extent = [ref_half.x, ref_half.y];
    let inc_extent = [inc_half.x, inc_half.y];

    // 参考面
    let face_center = reference.position + ref_normal * ref_extent[k];
    let side = ref_axes[1 - k];
    let side_extent = ref_extent[1 - k];

    // 入射面：法向与参考法向最反向的面
    let (j, sign) = {
        let d0 = inc_axes[0].dot(ref_normal);
        let d1 = inc_axes[1].dot(ref_normal);
        if d0.abs() > d1.abs() {
            (0, if d0 > 0.0 { -1.0 } else { 1.0 })
        } else {
            (1, if d1 > 0.0 { -1.0 } else { 1.0 })
        }
    };
    let inc_center = incident.position + inc_axes[j] * (sign * inc_extent[j]);
    let inc_side = inc_axes[1 - j] * inc_extent[1 - j];
    let segment = [inc_center + inc_side, inc_center - inc_side];

    let side_offset = side.dot(face_center);
    let Some(segment) = clip_segment(segment, side, side_offset + side_extent) else {
        return Vec::new();
    };
    let Some(segment) = clip_segment(segment, -side, -side_offset + side_extent) else {
        return Vec::new();
    };

    let mut points = Vec::with_capacity(2);
    for vertex in segment {
        let separation = ref_normal.dot(vertex - face_center);
        if separation <= 0.0 {
            // 取两表面的中点
            points.push((vertex - ref_normal * (separation * 0.5), normal, -separation));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(bodies: &mut [Body]) -> Vec<Contact> {
        let mut contacts = Vec::new();
        CollisionDetector::detect(bodies, &mut contacts, &WorldConfig::default());
        contacts
    }

    #[test]
    fn test_separated_circles_have_no_contact() {
        let mut bodies = vec![
            Body::new(Shape::circle(1.0), 1.0, Vector2::new(0.0, 0.0)),
            Body::new(Shape::circle(1.0), 1.0, Vector2::new(3.0, 0.0)),
        ];
        assert!(detect(&mut bodies).is_empty());
    }

    #[test]
    fn test_overlapping_circles() {
        let mut bodies = vec![
            Body::new(Shape::circle(1.0), 1.0, Vector2::new(0.0, 0.0)),
            Body::new(Shape::circle(1.0), 1.0, Vector2::new(1.5, 0.0)),
        ];
        let contacts = detect(&mut bodies);
        assert_eq!(contacts.len(), 1);
        let c = &contacts[0];
        assert_eq!((c.body_a, c.body_b), (0, 1));
        assert!(c.normal.approx_eq(Vector2::new(1.0, 0.0), 1e-12));
        assert!((c.penetration - 0.5).abs() < 1e-12);
        assert!(c.point.approx_eq(Vector2::new(0.75, 0.0), 1e-12));
    }

    #[test]
    fn test_static_pairs_are_skipped() {
        let mut bodies = vec![
            Body::new_static(Shape::rect(2.0, 2.0), Vector2::ZERO),
            Body::new_static(Shape::rect(2.0, 2.0), Vector2::new(0.5, 0.0)),
        ];
        assert!(detect(&mut bodies).is_empty());
    }

    #[test]
    fn test_circle_resting_on_rect_normal_points_a_to_b() {
        let ground = Body::new_static(Shape::rect(10.0, 1.0), Vector2::new(0.0, 0.0));
        let ball = Body::new(Shape::circle(0.5), 1.0, Vector2::new(1.0, 0.9));
        let mut bodies = vec![ground, ball];
        let contacts = detect(&mut bodies);
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].normal.approx_eq(Vector2::new(0.0, 1.0), 1e-12));
        assert!((contacts[0].penetration - 0.1).abs() < 1e-9);

        // 顺序反过来，法向跟着反向
        bodies.swap(0, 1);
        let contacts = detect(&mut bodies);
        assert!(contacts[0].normal.approx_eq(Vector2::new(0.0, -1.0), 1e-12));
    }

    #[test]
    fn test_circle_center_inside_rect() {
        let mut bodies = vec![
            Body::new(Shape::circle(0.5), 1.0, Vector2::new(0.8, 0.0)),
            Body::new_static(Shape::rect(2.0, 4.0), Vector2::ZERO),
        ];
        let contacts = detect(&mut bodies);
        assert_eq!(contacts.len(), 1);
        // 从圆指向矩形
        assert!(contacts[0].normal.approx_eq(Vector2::new(-1.0, 0.0), 1e-12));
        assert!((contacts[0].penetration - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_box_on_box_yields_two_points() {
        let mut bodies = vec![
            Body::new_static(Shape::rect(10.0, 1.0), Vector2::new(0.0, 0.0)),
            Body::new(Shape::rect(1.0, 1.0), 1.0, Vector2::new(0.0, 0.95)),
        ];
        let contacts = detect(&mut bodies);
        assert_eq!(contacts.len(), 2);
        for c in &contacts {
            assert!(c.normal.approx_eq(Vector2::new(0.0, 1.0), 1e-9));
            assert!((c.penetration - 0.05).abs() < 1e-9);
        }
        let xs: Vec<f64> = contacts.iter().map(|c| c.point.x).collect();
        assert!(xs.iter().any(|x| (x + 0.5).abs() < 1e-9));
        assert!(xs.iter().any(|x| (x - 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_rotated_boxes_separated_by_sat() {
        let mut bodies = vec![
            Body::new(Shape::rect(1.0, 1.0), 1.0, Vector2::new(0.0, 0.0)).with_angle(std::f64::consts::FRAC_PI_4),
            Body::new(Shape::rect(1.0, 1.0), 1.0, Vector2::new(1.0, 1.0)).with_angle(std::f64::consts::FRAC_PI_4),
        ];
        // 包围盒重叠但实际分离
        assert!(bodies[0].aabb().overlaps(bodies[1].aabb(), 0.0));
        assert!(detect(&mut bodies).is_empty());
    }
}
