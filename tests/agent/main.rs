#[path = "../support/mod.rs"]
mod support;

mod cycle;
mod results;
mod unreserve;
mod upload;
