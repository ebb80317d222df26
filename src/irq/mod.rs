//! Hardware IRQ routing fabric (spec §4.6).

pub mod router;
