pub mod collision;
pub mod combat;
pub mod drift;
pub mod drive;
pub mod ground;
pub mod progress;
pub mod projectile;
