use crate::core::WorldConfig;
use crate::physics::contact::pair_mut;
use crate::physics::{Body, BodyId, Vector2};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_JOINT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointId(u64);

impl JointId {
    fn next() -> Self {
        JointId(NEXT_JOINT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// 约束类型，锚点均为刚体局部坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointKind {
    /// 两锚点之间保持固定距离的刚性杆
    Distance {
        anchor_a: Vector2,
        anchor_b: Vector2,
        length: f64,
    },
    /// 两锚点重合（铰链）
    Revolute { anchor_a: Vector2, anchor_b: Vector2 },
}

/// 关节，跨步保留
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    id: JointId,
    pub body_a: BodyId,
    pub body_b: BodyId,
    pub kind: JointKind,
}

impl Joint {
    /// 距离关节，长度取两锚点当前的世界距离
    pub fn distance(a: &Body, anchor_a: Vector2, b: &Body, anchor_b: Vector2) -> Self {
        let length = a.world_point(anchor_a).distance_to(b.world_point(anchor_b));
        Self::new(
            a.id(),
            b.id(),
            JointKind::Distance {
                anchor_a,
                anchor_b,
                length,
            },
        )
    }

    /// 以世界坐标 `pivot` 为轴的铰链
    pub fn revolute(a: &Body, b: &Body, pivot: Vector2) -> Self {
        Self::new(
            a.id(),
            b.id(),
            JointKind::Revolute {
                anchor_a: a.local_point(pivot),
                anchor_b: b.local_point(pivot),
            },
        )
    }

    pub fn new(body_a: BodyId, body_b: BodyId, kind: JointKind) -> Self {
        Self {
            id: JointId::next(),
            body_a,
            body_b,
            kind,
        }
    }

    pub fn id(&self) -> JointId {
        self.id
    }

    /// 求解一次速度约束（含 Baumgarte 位置偏置）
    ///
    /// `a`、`b` 是两端刚体在列表中的下标。
    pub fn solve(&self, bodies: &mut [Body], a: usize, b: usize, step: f64, config: &WorldConfig) {
        let Some((body_a, body_b)) = pair_mut(bodies, a, b) else {
            return;
        };
        if step <= 0.0 {
            return;
        }
        let beta = config.bias_factor / step;
        match self.kind {
            JointKind::Distance {
                anchor_a,
                anchor_b,
                length,
            } => solve_distance(body_a, anchor_a, body_b, anchor_b, length, beta),
            JointKind::Revolute { anchor_a, anchor_b } => solve_revolute(body_a, anchor_a, body_b, anchor_b, beta),
        }
    }
}

fn solve_distance(a: &mut Body, anchor_a: Vector2, b: &mut Body, anchor_b: Vector2, length: f64, beta: f64) {
    let ra = anchor_a.rotate(a.angle);
    let rb = anchor_b.rotate(b.angle);
    let delta = (b.position + rb) - (a.position + ra);
    let current = delta.length();
    if current <= f64::EPSILON {
        return;
    }
    let n = delta / current;

    let rna = ra.cross(n);
    let rnb = rb.cross(n);
    let k = a.inverse_mass() + b.inverse_mass() + a.inverse_inertia() * rna * rna + b.inverse_inertia() * rnb * rnb;
    if k <= 0.0 {
        return;
    }
    let vn = (b.velocity_at(rb) - a.velocity_at(ra)).dot(n);
    let lambda = -(vn + beta * (current - length)) / k;
    let impulse = n * lambda;
    a.apply_impulse(-impulse, ra);
    b.apply_impulse(impulse, rb);
}

fn solve_revolute(a: &mut Body, anchor_a: Vector2, b: &mut Body, anchor_b: Vector2, beta: f64) {
    let ra = anchor_a.rotate(a.angle);
    let rb = anchor_b.rotate(b.angle);
    let (ma, mb) = (a.inverse_mass(), b.inverse_mass());
    let (ia, ib) = (a.inverse_inertia(), b.inverse_inertia());

    // 2x2 有效质量矩阵 K
    let k11 = ma + mb + ia * ra.y * ra.y + ib * rb.y * rb.y;
    let k12 = -ia * ra.x * ra.y - ib * rb.x * rb.y;
    let k22 = ma + mb + ia * ra.x * ra.x + ib * rb.x * rb.x;
    let det = k11 * k22 - k12 * k12;
    if det.abs() <= f64::EPSILON {
        return;
    }

    let error = (b.position + rb) - (a.position + ra);
    let rhs = -((b.velocity_at(rb) - a.velocity_at(ra)) + error * beta);
    let impulse = Vector2::new((k22 * rhs.x - k12 * rhs.y) / det, (k11 * rhs.y - k12 * rhs.x) / det);
    a.apply_impulse(-impulse, ra);
    b.apply_impulse(impulse, rb);
}
