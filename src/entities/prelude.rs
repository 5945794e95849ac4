pub use super::organizations::Entity as Organizations;
