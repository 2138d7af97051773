pub mod attendance;
pub mod content;
pub mod core;
pub mod marks;
pub mod session;
pub mod students;
