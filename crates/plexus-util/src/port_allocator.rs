use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    net::{SocketAddr, TcpListener},
    sync::{LazyLock, Mutex},
    time::SystemTime,
};

/// Global port allocator starting from a random port (to avoid conflicts with other services)
static NEXT_PORT: LazyLock<Mutex<u16>> = LazyLock::new(|| {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    let random_offset = (hasher.finish() % 10000) as u16;
    Mutex::new(15000 + random_offset)
});

/// Allocate the next available port, starting from a random port in range 15000-25000
pub fn allocate_port() -> u16 {
    allocate_port_block(1)
}

/// Allocate a contiguous block of `count` available ports and return the first.
///
/// Useful for components that derive per-node ports from a base (base + node id).
pub fn allocate_port_block(count: u16) -> u16 {
    assert!(count > 0);
    let mut port_guard = NEXT_PORT.lock().unwrap();

    // Try up to 10000 starting positions from the current cursor
    for _ in 0..10000 {
        let base = *port_guard;
        *port_guard += count;

        if (base..base + count).all(is_port_available) {
            return base;
        }
    }

    panic!("no available port block of size {count} found");
}

/// Check if a port is available by attempting to bind to it
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).is_ok()
}

/// Allocate a socket address with an available port
pub fn allocate_socket_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], allocate_port()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_ports() {
        let a = allocate_port();
        let b = allocate_port();
        assert_ne!(a, b);
    }

    #[test]
    fn allocates_contiguous_block() {
        let base = allocate_port_block(4);
        for port in base..base + 4 {
            assert!(is_port_available(port));
        }
    }
}
