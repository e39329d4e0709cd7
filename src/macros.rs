/// Prints a line prefixed with the local time, like `info!` in tracing.
/// Pass a starting time first and the elapsed seconds get appended.
/// ```ignore
/// info_time!("page {} done", 50);
/// let start = Local::now();
/// info_time!(start, "pool drained: {} pages", 3);
/// ```
#[macro_export]
macro_rules! info_time {
    ($strfm:literal $(,)? $($arg:expr),*) => {{
        let local_now = $crate::macros::now();
        println!("{:<30} : {}", local_now, format!($strfm, $($arg),*));
    }};
    ($time:expr, $strfm:literal $(,)? $($arg:expr),*) => {{
        let local_now = $crate::macros::now();
        println!(
            "{:<30} : {} ({} sec)",
            local_now,
            format!($strfm, $($arg),*),
            $crate::macros::elapsed_secs($time, local_now)
        );
    }};
}

/// Same as [`info_time!`] but goes to stderr, used for failed pages.
#[macro_export]
macro_rules! warn_time {
    ($strfm:literal $(,)? $($arg:expr),*) => {{
        let local_now = $crate::macros::now();
        eprintln!("{:<30} : WARN {}", local_now, format!($strfm, $($arg),*));
    }};
    ($time:expr, $strfm:literal $(,)? $($arg:expr),*) => {{
        let local_now = $crate::macros::now();
        eprintln!(
            "{:<30} : WARN {} ({} sec)",
            local_now,
            format!($strfm, $($arg),*),
            $crate::macros::elapsed_secs($time, local_now)
        );
    }};
}

#[doc(hidden)]
pub fn now() -> chrono::DateTime<chrono::Local> {
    chrono::Local::now()
}

#[doc(hidden)]
pub fn elapsed_secs(
    start: chrono::DateTime<chrono::Local>,
    now: chrono::DateTime<chrono::Local>,
) -> f64 {
    (now - start)
        .num_microseconds()
        .map(|n| n as f64 / 1_000_000.0)
        .unwrap_or(0.0)
}
