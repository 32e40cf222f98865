//! Polling policy shared by every waiter.
//!
//! ```text
//! PollPolicy::run(condition)
//!   loop: condition.attempt() (bounded by deadline)
//!           Ready     → return
//!           Fatal     → abort
//!           Pending   ┐
//!           Transient ┘→ sleep min(interval, remaining) → retry, or DeadlineExceeded
//! ```

pub mod poll;

pub use poll::{Attempt, Condition, PollError, PollPolicy};
