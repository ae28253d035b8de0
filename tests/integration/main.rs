#[path = "../helpers/mod.rs"]
mod helpers;

mod attributes;
mod config;
mod locks;
mod paths;
mod recovery;
