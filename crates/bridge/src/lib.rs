//! Message passing between the monitor's isolated execution contexts.
//!
//! Each context (page session, background coordinator, UI surface) owns an
//! inbox on the [`MessageBus`] and serves it through a [`MessageRouter`].
//! The page-world capture script talks to its bridging context over a
//! same-window channel ([`page`]).

pub mod bus;
pub mod messages;
pub mod page;
pub mod router;

pub use bus::*;
pub use messages::*;
pub use page::*;
pub use router::*;
