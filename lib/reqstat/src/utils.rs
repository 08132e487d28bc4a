use std::str::FromStr;

pub fn env_var_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes" || v == "on"
        }
        Err(_) => false,
    }
}

/// Parses `name` from the environment, falling back to `default` when unset or unparsable.
pub fn env_parse_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

pub fn available_threads() -> usize {
    num_cpus::get().max(1)
}

/// Integer mean that reports 0 for an empty population.
pub fn mean_or_zero(total: i64, count: u64) -> i64 {
    if count == 0 { 0 } else { total / count as i64 }
}
