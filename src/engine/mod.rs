pub mod background;
pub mod delivery;
pub mod dispatch;
pub mod lifecycle;
pub mod orders;
pub mod ratings;
pub mod registry;
