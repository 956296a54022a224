//! Spagate - serve a single-page-application frontend from a Rust backend
//!
//! This library lets an HTTP server host an SPA frontend in one of two modes.
//!
//! - Development: spawns the frontend's dev server, waits for it to print its
//!   listen URL, and reverse-proxies every request to it. The dev server is
//!   stopped when the owning shutdown signal fires.
//! - Release: serves prebuilt assets from a read-only store with SPA fallback
//!   routing (exact file, then a pre-rendered `.html` page, then the shell).

pub mod assets;
pub mod command;
pub mod config;
pub mod devserver;
pub mod error;
pub mod framework;
pub mod proxy;
pub mod router;
pub mod server;
