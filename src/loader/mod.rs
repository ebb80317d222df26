//! ELF32/386 image loading and init-bundle parsing (spec §4.8).

pub mod elf;
pub mod initbundle;
