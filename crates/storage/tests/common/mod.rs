pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{sha256_hash, seeded_bytes};
