pub mod container;
pub mod health_check;
pub mod job_schedulers;
mod shell;
