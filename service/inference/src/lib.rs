mod lifecycle;
mod recipe_loader;
mod registry;
mod target;

pub use lifecycle::{LifecycleServiceImpl, LifecycleSettings, RESULTS_FILE};
pub use recipe_loader::RecipeLoader;
pub use registry::InstanceRegistry;
pub use target::{resolve_target, ResolvedTarget};
