//! Threading primitives shared by the channel, the mixer and the producers.

pub mod deferred;
pub mod executor;
pub mod governor;

pub use deferred::{Deferred, Promise};
pub use executor::{Executor, Priority};
pub use governor::{Governor, Ticket};
