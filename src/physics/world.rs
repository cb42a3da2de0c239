use crate::core::{PhysicsError, PhysicsResult, WorldConfig};
use crate::physics::{Body, BodyId, CollisionDetector, ConstraintSolver, Contact, Joint, JointId, Vector2};
use log::{debug, info, warn};

/// 物理世界接口
pub trait PhysicsWorld {
    /// 推进 `step` 秒；步长为负（或 NaN）时不做任何事并返回错误
    fn update(&mut self, step: f64) -> PhysicsResult<()>;

    fn add_body(&mut self, body: Body) -> PhysicsResult<BodyId>;

    fn remove_body(&mut self, id: BodyId) -> PhysicsResult<Body>;

    fn add_joint(&mut self, joint: Joint) -> PhysicsResult<JointId>;

    fn remove_joint(&mut self, id: JointId) -> PhysicsResult<Joint>;

    fn gravity(&self) -> Vector2;

    fn set_gravity(&mut self, gravity: Vector2);

    fn damping(&self) -> f64;

    /// 线性阻尼系数，不能为负
    fn set_damping(&mut self, damping: f64) -> PhysicsResult<()>;
}

/// 刚体世界
///
/// 刚体列表的顺序决定碰撞对的枚举顺序。接触列表每次检测前清空重建。
#[derive(Debug, Clone, Default)]
pub struct World {
    bodies: Vec<Body>,
    joints: Vec<Joint>,
    contacts: Vec<Contact>,
    config: WorldConfig,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        Self {
            bodies: Vec::new(),
            joints: Vec::new(),
            contacts: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    /// 最后一次检测得到的接触
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.iter().find(|b| b.id() == id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.iter_mut().find(|b| b.id() == id)
    }

    fn index_of(&self, id: BodyId) -> Option<usize> {
        self.bodies.iter().position(|b| b.id() == id)
    }

    fn free_body_simulation(&mut self, step: f64) {
        let (gravity, damping) = (self.config.gravity, self.config.damping);
        for body in &mut self.bodies {
            body.free_update_velocity(gravity, damping, step);
        }
    }

    /// 重建接触列表，并在其上迭代求解
    fn body_collision_detection(&mut self, step: f64) {
        self.contacts.clear();
        CollisionDetector::detect(&mut self.bodies, &mut self.contacts, &self.config);

        for _ in 0..self.config.max_iterations {
            for body in &mut self.bodies {
                body.clear_bias();
            }
            for contact in &mut self.contacts {
                contact.reset_accumulators();
            }
            for contact in &mut self.contacts {
                ConstraintSolver::apply_contact(&mut self.bodies, contact, step, &self.config);
            }
            for contact in &mut self.contacts {
                ConstraintSolver::solve_contact(&mut self.bodies, contact);
            }
        }
    }

    fn body_position_correction(&mut self, step: f64) {
        for body in &mut self.bodies {
            body.correct_position(step);
        }
    }

    /// 两端刚体缺失的关节跳过
    fn joint_solve(&mut self, step: f64) {
        for joint in &self.joints {
            let (Some(a), Some(b)) = (
                self.bodies.iter().position(|x| x.id() == joint.body_a),
                self.bodies.iter().position(|x| x.id() == joint.body_b),
            ) else {
                continue;
            };
            joint.solve(&mut self.bodies, a, b, step, &self.config);
        }
    }

    fn body_position_update(&mut self, step: f64) {
        for body in &mut self.bodies {
            body.free_update_position(step);
        }
    }
}

impl PhysicsWorld for World {
    fn update(&mut self, step: f64) -> PhysicsResult<()> {
        if step.is_nan() || step < 0.0 {
            warn!("⚠️ 拒绝无效步长: {}", step);
            return Err(PhysicsError::InvalidStep(step));
        }
        self.free_body_simulation(step);
        // 每轮重新检测碰撞，再做位置修正和关节求解
        for _ in 0..self.config.max_iterations {
            self.body_collision_detection(step);
            self.body_position_correction(step);
            self.joint_solve(step);
        }
        self.body_position_update(step);
        Ok(())
    }

    fn add_body(&mut self, body: Body) -> PhysicsResult<BodyId> {
        let id = body.id();
        if self.index_of(id).is_some() {
            return Err(PhysicsError::DuplicateBody(id));
        }
        debug!("➕ 添加刚体 {:?} (静态: {})", id, body.is_static());
        self.bodies.push(body);
        Ok(id)
    }

    fn remove_body(&mut self, id: BodyId) -> PhysicsResult<Body> {
        let index = self.index_of(id).ok_or(PhysicsError::BodyNotFound(id))?;
        debug!("➖ 移除刚体 {:?}", id);
        Ok(self.bodies.remove(index))
    }

    fn add_joint(&mut self, joint: Joint) -> PhysicsResult<JointId> {
        let id = joint.id();
        if self.joints.iter().any(|j| j.id() == id) {
            return Err(PhysicsError::DuplicateJoint(id));
        }
        if joint.body_a == joint.body_b {
            return Err(PhysicsError::InvalidJoint(id));
        }
        debug!("🔗 添加关节 {:?}: {:?} - {:?}", id, joint.body_a, joint.body_b);
        self.joints.push(joint);
        Ok(id)
    }

    fn remove_joint(&mut self, id: JointId) -> PhysicsResult<Joint> {
        let index = self
            .joints
            .iter()
            .position(|j| j.id() == id)
            .ok_or(PhysicsError::JointNotFound(id))?;
        Ok(self.joints.remove(index))
    }

    fn gravity(&self) -> Vector2 {
        self.config.gravity
    }

    fn set_gravity(&mut self, gravity: Vector2) {
        info!("🌍 重力: ({:.3}, {:.3})", gravity.x, gravity.y);
        self.config.gravity = gravity;
    }

    fn damping(&self) -> f64 {
        self.config.damping
    }

    fn set_damping(&mut self, damping: f64) -> PhysicsResult<()> {
        if damping.is_nan() || damping < 0.0 {
            return Err(PhysicsError::InvalidDamping(damping));
        }
        self.config.damping = damping;
        Ok(())
    }
}
