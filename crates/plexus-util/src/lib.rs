//! Shared helpers for plexus crates.

pub mod port_allocator;

pub use port_allocator::{allocate_port, allocate_port_block, allocate_socket_addr};
