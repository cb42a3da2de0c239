// 二维刚体物理核心

pub mod body;
pub mod collision;
pub mod contact;
pub mod joint;
pub mod shape;
pub mod vector;
pub mod world;

pub use body::{Body, BodyId};
pub use collision::CollisionDetector;
pub use contact::{ConstraintSolver, Contact};
pub use joint::{Joint, JointId, JointKind};
pub use shape::{Aabb, Shape};
pub use vector::Vector2;
pub use world::{PhysicsWorld, World};
