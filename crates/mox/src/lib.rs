//! Command line front end for Moxillan packages

pub mod commands;
