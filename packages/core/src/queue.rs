//! Queue naming rules.
//!
//! Queues are implicit: a queue exists as long as it holds a job, and is
//! addressed only by its name.

use crate::JobError;

/// Queue used when a caller names no queue at all.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Check that a queue name is usable as a key.
pub fn validate_queue_name(name: &str) -> Result<(), JobError> {
    if name.is_empty() {
        return Err(JobError::Config("queue name is empty".into()));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(JobError::Config(format!(
            "queue name '{}' contains whitespace",
            name
        )));
    }
    Ok(())
}

/// Validate and deduplicate queue names, keeping the caller's order.
///
/// An empty list means the default queue.
pub fn queues_or_default<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>, JobError> {
    if names.is_empty() {
        return Ok(vec![DEFAULT_QUEUE_NAME.to_string()]);
    }
    normalize_queue_names(names)
}

/// Validate and deduplicate queue names, keeping the caller's order.
///
/// An empty list stays empty, which store operations read as "all queues".
pub fn normalize_queue_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>, JobError> {
    let mut queues: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        validate_queue_name(name)?;
        if !queues.iter().any(|q| q == name) {
            queues.push(name.to_string());
        }
    }
    Ok(queues)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_means_default_queue() {
        let none: [&str; 0] = [];
        assert_eq!(queues_or_default(&none).unwrap(), vec!["default"]);
        assert!(normalize_queue_names(&none).unwrap().is_empty());
    }

    #[test]
    fn keeps_order_and_drops_duplicates() {
        let queues = queues_or_default(&["high", "default", "high"]).unwrap();
        assert_eq!(queues, vec!["high", "default"]);
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name("two words").is_err());
        assert!(validate_queue_name("emails-2").is_ok());
    }
}
