use thiserror::Error;

/// Invalid subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("empty subscription pattern")]
    Empty,
    #[error("'#' must be the last level: {0}")]
    MisplacedMultiLevel(String),
    #[error("wildcards must occupy a whole level: {0}")]
    PartialWildcard(String),
}

/// Checks a pub/sub pattern: `+` matches one level, trailing `#` any suffix.
pub fn validate_pattern(pattern: &str) -> Result<(), PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::Empty);
    }
    let levels: Vec<&str> = pattern.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err(PatternError::PartialWildcard(pattern.to_string()));
            }
            if i + 1 != levels.len() {
                return Err(PatternError::MisplacedMultiLevel(pattern.to_string()));
            }
        }
        if level.contains('+') && *level != "+" {
            return Err(PatternError::PartialWildcard(pattern.to_string()));
        }
    }
    Ok(())
}

/// Whether `topic` is selected by `pattern`.
///
/// Patterns are assumed valid (see [`validate_pattern`]).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
