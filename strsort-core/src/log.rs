//! Debug Logging
//!
//! To use in a debug build, set the env var `STRSORT_LOG=1`. In a release
//! build, logs are compiled out.

use std::env;

#[derive(Debug)]
#[allow(dead_code)]
pub(super) enum Event {
    EnqueuedInjected,
    EnqueuedLocal { worker: usize },
    PoppedJob { worker: usize },
    UninjectedWork { worker: usize },
    StoleWork { worker: usize, victim: usize },
    FellAsleep { worker: usize },
    GotAwoken { worker: usize },
    Tickle { idle: usize },
    JobPanicked { worker: usize },
    Quiescent,
}

pub(super) const DUMP_LOGS: bool = cfg!(debug_assertions);

lazy_static::lazy_static! {
    pub(super) static ref LOG_ENV: bool = env::var("STRSORT_LOG").is_ok();
}

macro_rules! log {
    ($event:expr) => {
        if crate::log::DUMP_LOGS {
            if *crate::log::LOG_ENV {
                eprintln!("{:?}", $event);
            }
        }
    };
}
