//! Model components: Lorentzian peaks and the optional polynomial baseline.
//!
//! Both are small, pure evaluators so the solver can stay generic over the
//! flattened parameter vector.

pub mod background;
pub mod peak;

pub use background::*;
pub use peak::*;
