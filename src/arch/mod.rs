//! Architecture support. Only i686 is implemented; [`hal`] is the narrow
//! surface a second architecture would need to satisfy.

pub mod hal;
pub mod x86;
