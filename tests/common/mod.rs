#![allow(dead_code)]

pub mod actions;
pub mod fixtures;

#[allow(unused_imports)]
pub use actions::*;
#[allow(unused_imports)]
pub use fixtures::*;
