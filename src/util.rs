//
// String util methods
//
use std::str::FromStr;

/// Trims and lowercases an email address the way membership caches and log
/// entries store them (§3.1, §3.2 invariant 3).
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The domain portion of an email address, lowercased, or `""` if there is none.
pub fn email_domain(email: &str) -> String {
    email.rsplit_once('@').map(|(_, domain)| domain.trim().to_lowercase()).unwrap_or_default()
}

pub fn try_parse_string<S, T>(string: Option<S>) -> Option<T>
where
    S: AsRef<str>,
    T: FromStr,
{
    if let Some(Ok(value)) = string.map(|s| s.as_ref().parse::<T>()) {
        Some(value)
    } else {
        None
    }
}

//
// Env methods
//

use std::{env, fs};

pub fn get_env_str_value(key: &str) -> Option<String> {
    let key_file = format!("{key}_FILE");
    let value_from_env = env::var(key);
    let value_file = env::var(&key_file);

    match (value_from_env, value_file) {
        (Ok(_), Ok(_)) => panic!("You should not define both {key} and {key_file}!"),
        (Ok(v_env), Err(_)) => Some(v_env),
        (Err(_), Ok(v_file)) => match fs::read_to_string(v_file) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => panic!("Failed to load {key}: {e:?}"),
        },
        _ => None,
    }
}

pub fn get_env<V>(key: &str) -> Option<V>
where
    V: FromStr,
{
    try_parse_string(get_env_str_value(key))
}

pub fn get_env_bool(key: &str) -> Option<bool> {
    const TRUE_VALUES: &[&str] = &["true", "t", "yes", "y", "1"];
    const FALSE_VALUES: &[&str] = &["false", "f", "no", "n", "0"];

    match get_env_str_value(key) {
        Some(val) if TRUE_VALUES.contains(&val.to_lowercase().as_ref()) => Some(true),
        Some(val) if FALSE_VALUES.contains(&val.to_lowercase().as_ref()) => Some(false),
        _ => None,
    }
}

//
// Time util methods
//

/// Current time in epoch milliseconds, the unit every timestamp in this
/// crate's data model (§3.1) is expressed in.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

//
// Retry methods
//

use std::time::Duration;

/// Retries an async, fallible operation up to `max_tries` times with a fixed
/// backoff between attempts. Used by the blob store façade's optimistic
/// update loop (§4.1) — the async analogue of the synchronous retry loops
/// the rest of this codebase uses for its own I/O.
pub async fn retry_async<F, Fut, T, E>(mut func: F, max_tries: u32) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut tries = 0;

    loop {
        match func().await {
            ok @ Ok(_) => return ok,
            err @ Err(_) => {
                tries += 1;

                if tries >= max_tries {
                    return err;
                }

                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
