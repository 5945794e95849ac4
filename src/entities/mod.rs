pub mod prelude;

pub mod organizations;
