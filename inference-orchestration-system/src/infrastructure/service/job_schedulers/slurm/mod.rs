mod models;
mod slurm_client;

pub use slurm_client::SlurmClient;
