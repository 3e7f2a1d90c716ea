use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use microfab::lifecycle::PortAllocator;
use microfab::model::ConfigError;

/// Concurrent allocation for M organizations of K ports each yields M×K distinct ports.
#[test]
fn test_concurrent_allocation_never_collides() {
    const ORGANIZATIONS: usize = 12;
    const PORTS_PER_ORGANIZATION: usize = 4;
    let allocator = Arc::new(PortAllocator::default());

    let handles: Vec<_> = (0..ORGANIZATIONS)
        .map(|_| {
            let allocator = allocator.clone();
            thread::spawn(move || {
                (0..PORTS_PER_ORGANIZATION)
                    .map(|_| allocator.allocate().expect("port available"))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let ports: Vec<u16> = handles
        .into_iter()
        .flat_map(|handle| handle.join().expect("allocating thread"))
        .collect();

    let distinct: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(ports.len(), ORGANIZATIONS * PORTS_PER_ORGANIZATION);
    assert_eq!(distinct.len(), ports.len());
    assert!(ports.iter().all(|port| (2000..2048).contains(port)));
}

/// Exhausting the pool is an error for every caller past the end; nothing wraps around.
#[test]
fn test_exhaustion_is_fatal_under_contention() {
    let allocator = Arc::new(PortAllocator::new(2000, 2010));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let allocator = allocator.clone();
            thread::spawn(move || (0..5).map(|_| allocator.allocate()).collect::<Vec<_>>())
        })
        .collect();
    let results: Vec<Result<u16, ConfigError>> = handles
        .into_iter()
        .flat_map(|handle| handle.join().expect("allocating thread"))
        .collect();

    let granted: HashSet<u16> = results.iter().filter_map(|result| result.as_ref().ok().copied()).collect();
    assert_eq!(granted, (2000..2010).collect());
    let refused = results
        .iter()
        .filter(|result| matches!(result, Err(ConfigError::PortsExhausted { start: 2000, end: 2010 })))
        .count();
    assert_eq!(refused, 10);
}
