//! Cash Delhi Server - Events API for the Cash Delhi marketing site.
//!
//! This crate provides the backend for the public site and its admin panel:
//! - Listing and fetching events for public pages
//! - Creating, updating and deleting events behind an admin session
//! - Username/password login with server-side sessions
//!
//! # Architecture
//!
//! Handlers in [`routes`] delegate to repositories ([`events`], [`users`])
//! over a shared SQLite pool, and to the [`auth::Authenticator`], which pairs
//! the user repository with a [`session::SessionStore`]. Each layer has its own
//! error enum that converts into [`error::ApiError`] at the HTTP boundary.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod routes;
pub mod session;
pub mod types;
pub mod users;
pub mod validation;
