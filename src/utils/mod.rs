mod maths_utils;
mod time_utils;

pub use time_utils::{epoch_ms_to_utc, now_ms, now_secs};

pub(crate) use maths_utils::{mean, round_to};
