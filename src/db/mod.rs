//! Database layer for roadwise
//!
//! MongoDB storage for users, students, courses and the rest of the
//! school's documents.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
