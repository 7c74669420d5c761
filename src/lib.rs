//! chronos: run a program and report the time spent by its whole process tree

pub mod app;
pub mod cli;
mod prelude;
pub mod reporter;
pub mod supervisor;
