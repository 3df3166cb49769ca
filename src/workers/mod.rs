pub mod rate_lock_sweeper;

pub use rate_lock_sweeper::RateLockSweeper;
