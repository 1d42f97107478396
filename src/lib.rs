pub mod build_result;
pub mod derived_path;
pub mod error;
pub mod goal;
pub mod manifest;
pub mod process;
pub mod progress;
pub mod registry;
pub mod run;
pub mod scanner;
mod signal;
pub mod store;
pub mod strategy;
pub mod trace;
pub mod worker;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
