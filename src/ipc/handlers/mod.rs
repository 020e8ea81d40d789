pub mod classes;
pub mod core;
pub mod grading;
pub mod results;
pub mod students;
pub mod table;
