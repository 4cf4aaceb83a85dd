pub mod check;
pub mod departments;
pub mod report;
pub mod status;
