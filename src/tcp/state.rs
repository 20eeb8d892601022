//! Read/write availability flags, surfaced from a connection up through the
//! driver glue so blocked threads know when to wake.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Available: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}
