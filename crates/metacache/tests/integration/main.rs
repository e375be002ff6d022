// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod isolation;
pub mod single_flight;

pub use utils::*;
