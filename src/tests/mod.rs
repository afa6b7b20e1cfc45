//! Test modules for followbot, organized by the module they test.


pub mod resolver_tests;
pub mod store_tests;
