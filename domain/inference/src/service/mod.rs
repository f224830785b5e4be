mod command_builder_service;
mod health_check_service;
mod job_scheduler_service;
mod lifecycle_service;

#[rustfmt::skip]
pub use self::{
    command_builder_service::CommandBuilderService,
    health_check_service::HealthCheckService,
    job_scheduler_service::JobSchedulerService,
    lifecycle_service::LifecycleService,
};
