#![deny(unused_variables)]
#![deny(unused_imports)]
pub mod config;
pub mod dates;
pub mod impute;
pub mod normalize;
pub mod progress;
pub mod reference;
pub mod synthesize;
pub mod types;
