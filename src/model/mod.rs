pub mod common;
pub mod entities;
pub mod geometry;
pub mod history;

pub use common::*;
pub use entities::*;
pub use geometry::*;
pub use history::*;
