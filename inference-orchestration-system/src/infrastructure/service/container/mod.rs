mod apptainer;

pub use apptainer::ApptainerCommandBuilder;
