//! Route modules for the Sagasu server

pub mod upload;
