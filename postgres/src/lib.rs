//! `PostgreSQL` queue transport for the request relay.
//!
//! This crate provides [`PostgresQueue`], a durable implementation of the
//! `QueueTransport` trait from `request-relay-core`. Any number of intake and
//! processor processes may share one database:
//!
//! - Messages live in `queue_messages` until acknowledged
//! - Leasing uses `FOR UPDATE SKIP LOCKED`, so concurrent consumers never
//!   lease the same visible message
//! - Visibility is a `visible_at` timestamp computed by the database clock
//! - Each lease writes a fresh `lease_token`; acknowledge and dead-letter
//!   only succeed for the current token
//! - Dead-lettered messages move to `dead_letter_messages` under the name
//!   `<queue>-poison`
//!
//! # Example
//!
//! ```ignore
//! use request_relay_postgres::PostgresQueue;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = PostgresQueue::connect("postgres://localhost/relay", 10).await?;
//!     queue.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letters;
mod queue;

pub use dead_letters::DeadLetter;
pub use queue::PostgresQueue;
