pub mod attendance;
pub mod calendar;
pub mod core;
pub mod exams;
pub mod students;
