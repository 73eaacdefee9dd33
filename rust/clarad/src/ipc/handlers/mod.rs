pub mod core;
pub mod mindmap;
pub mod revision;
pub mod roster;
