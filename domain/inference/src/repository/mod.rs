mod instance;
mod recipe;

#[rustfmt::skip]
pub use {
    instance::InstanceRepo,
    recipe::RecipeRepo,
};
