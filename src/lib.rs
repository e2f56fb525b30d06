//! Roadwise - driving school management service
//!
//! JSON API behind a driving school website: the public catalogue
//! (courses, instructors, testimonials, exam results), student accounts,
//! enrollments and online payment, certificates, contact inquiries, a
//! chatbot, and the back office used by staff.
//!
//! ## Services
//!
//! - **Catalogue**: public listings served through a two-tier cache with a
//!   stale snapshot fallback when MongoDB is unreachable
//! - **Accounts**: argon2 passwords, JWT session cookies, STUDENT / ADMIN roles
//! - **Payments**: Razorpay and PhonePe behind one gateway trait
//! - **Back office**: CRUD for every entity, audit trail, stats
//! - **Mail**: SMTP notifications via lettre

pub mod auth;
pub mod cache;
pub mod chat;
pub mod config;
pub mod db;
pub mod logging;
pub mod mail;
pub mod metrics;
pub mod payments;
pub mod ratelimit;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AppError, Result};
