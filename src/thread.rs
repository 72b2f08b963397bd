/// The type of a thread id
pub type ThreadId = u64;

/// Get the current OS thread id
#[cfg(target_os = "linux")]
pub fn id() -> ThreadId {
    // Safety: gettid(2) says this never fails
    unsafe { libc::gettid() as ThreadId }
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn id() -> ThreadId {
    // Safety: pthread_self(3) always succeeds
    unsafe { libc::pthread_self() as ThreadId }
}

#[cfg(not(unix))]
pub fn id() -> ThreadId {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}
