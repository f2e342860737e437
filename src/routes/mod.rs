//! Route modules for Keepsake Server

pub mod files;
pub mod health;
pub mod upload;
