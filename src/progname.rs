use std::env;

/// The program name as recorded at process start (`argv[0]`, unmodified).
///
/// Empty when the platform supplied no arguments at all.
pub fn invocation_name() -> String {
    env::args_os()
        .next()
        .map(|a| a.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The final path component of [`invocation_name`].
pub fn invocation_short_name() -> String {
    let full = invocation_name();
    match full.rsplit_once('/') {
        Some((_, short)) => short.to_string(),
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_is_a_suffix_of_the_full_name() {
        let full = invocation_name();
        let short = invocation_short_name();
        assert!(full.ends_with(&short));
        assert!(!short.contains('/'));
    }
}
