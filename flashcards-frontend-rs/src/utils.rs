use rand::SeedableRng;
use rand::rngs::StdRng;

pub fn set_panic_hook() {
    // With the `console_error_panic_hook` feature on, panics are reported
    // through `console.error` instead of an opaque "unreachable" trap.
    #[cfg(all(target_arch = "wasm32", feature = "console_error_panic_hook"))]
    console_error_panic_hook::set_once();
}

/// A seeded generator when the page asks for reproducible shuffles, otherwise
/// one seeded from the wall clock.
pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    let seed = seed.unwrap_or_else(|| chrono::Utc::now().timestamp_micros() as u64);
    StdRng::seed_from_u64(seed)
}
