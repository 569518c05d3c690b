//! CLI module for skyfollow - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
