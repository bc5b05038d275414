//! Start-order planning for components and images.

use std::cmp::Ordering;

use crate::{
    config::{DevlabConfig, Ordinal},
    DevlabError, DevlabResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One segment of a naturally-sorted name. Digit runs compare numerically so that
/// `comp2` sorts before `comp10`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NaturalPart {
    Num(u64),
    Text(String),
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Ord for NaturalPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (NaturalPart::Num(a), NaturalPart::Num(b)) => a.cmp(b),
            (NaturalPart::Text(a), NaturalPart::Text(b)) => a.cmp(b),
            (NaturalPart::Num(_), NaturalPart::Text(_)) => Ordering::Less,
            (NaturalPart::Text(_), NaturalPart::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for NaturalPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Splits a name into alternating text and digit-run segments for natural comparison.
fn natural_key(name: &str) -> Vec<NaturalPart> {
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut in_digits = false;

    for ch in name.chars() {
        if ch.is_ascii_digit() != in_digits && !buf.is_empty() {
            parts.push(flush(&mut buf, in_digits));
        }
        in_digits = ch.is_ascii_digit();
        buf.push(ch);
    }
    if !buf.is_empty() {
        parts.push(flush(&mut buf, in_digits));
    }

    parts
}

fn flush(buf: &mut String, digits: bool) -> NaturalPart {
    let part = if digits {
        match buf.parse::<u64>() {
            Ok(num) => NaturalPart::Num(num),
            Err(_) => NaturalPart::Text(buf.clone()),
        }
    } else {
        NaturalPart::Text(buf.clone())
    };
    buf.clear();
    part
}

/// Sorts names by `(ordinal.group, ordinal.number, natural(name))`. Names the lookup does not
/// recognize are an error.
pub fn ordinal_sort<F>(names: &[String], ordinal_of: F) -> DevlabResult<Vec<String>>
where
    F: Fn(&str) -> Option<Ordinal>,
{
    let mut keyed = Vec::with_capacity(names.len());
    for name in names {
        let ordinal = ordinal_of(name)
            .ok_or_else(|| DevlabError::UnknownComponent(name.clone()))?;
        keyed.push((ordinal, natural_key(name), name.clone()));
    }
    keyed.sort();
    Ok(keyed.into_iter().map(|(_, _, name)| name).collect())
}

/// Returns the order components start in: ordinal-sorted, with the foreground component
/// always last when it is part of the set.
pub fn up_order(config: &DevlabConfig, components: &[String]) -> DevlabResult<Vec<String>> {
    let foreground = config.foreground_name();
    let mut rest: Vec<String> = components
        .iter()
        .filter(|name| Some(name.as_str()) != foreground)
        .cloned()
        .collect();
    rest = ordinal_sort(&rest, |name| {
        config
            .find_component(name)
            .map(|comp| comp.ordinal_or_default())
    })?;

    if let Some(foreground) = foreground {
        if components.iter().any(|name| name == foreground) {
            rest.push(foreground.to_string());
        }
    }

    Ok(rest)
}

/// Returns the order components stop in: the reverse of the start order, so the foreground
/// component goes down first and the lowest ordinals last.
pub fn down_order(config: &DevlabConfig, components: &[String]) -> DevlabResult<Vec<String>> {
    let mut order = up_order(config, components)?;
    order.reverse();
    Ok(order)
}

/// Returns the order components are reset in. The virtual `devlab` target and the foreground
/// component are pulled out before sorting and land at the end of the reversed order.
pub fn reset_order(config: &DevlabConfig, components: &[String]) -> DevlabResult<Vec<String>> {
    let foreground = config.foreground_name();
    let mut rest: Vec<String> = components
        .iter()
        .filter(|name| name.as_str() != super::reset::DEVLAB_TARGET)
        .filter(|name| Some(name.as_str()) != foreground)
        .cloned()
        .collect();
    rest = ordinal_sort(&rest, |name| {
        config
            .find_component(name)
            .map(|comp| comp.ordinal_or_default())
    })?;

    if components
        .iter()
        .any(|name| name == super::reset::DEVLAB_TARGET)
    {
        rest.insert(0, super::reset::DEVLAB_TARGET.to_string());
    }
    if let Some(foreground) = foreground {
        if components.iter().any(|name| name == foreground) {
            rest.insert(0, foreground.to_string());
        }
    }

    rest.reverse();
    Ok(rest)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DevlabConfig {
        serde_yaml::from_str(
            r#"
            components:
              db:
                ordinal: { group: 0, number: 1 }
              api:
                ordinal: { group: 1, number: 1 }
            foreground_component:
              name: cli
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_up_order_sorts_by_ordinal_with_foreground_last() {
        let config = sample_config();
        let components = vec!["cli".to_string(), "api".to_string(), "db".to_string()];

        let order = up_order(&config, &components).unwrap();

        assert_eq!(order, vec!["db", "api", "cli"]);
    }

    #[test]
    fn test_down_order_is_reversed_with_foreground_first() {
        let config = sample_config();
        let components = vec!["db".to_string(), "api".to_string(), "cli".to_string()];

        let order = down_order(&config, &components).unwrap();

        assert_eq!(order, vec!["cli", "api", "db"]);
    }

    #[test]
    fn test_ordering_is_stable_under_resort() {
        let config = sample_config();
        let components = vec!["api".to_string(), "db".to_string()];

        let once = up_order(&config, &components).unwrap();
        let twice = up_order(&config, &once).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_natural_sort_orders_digit_runs_numerically() {
        let names = vec!["comp10".to_string(), "comp2".to_string()];

        let sorted = ordinal_sort(&names, |_| Some(Ordinal::default())).unwrap();

        assert_eq!(sorted, vec!["comp2", "comp10"]);
    }

    #[test]
    fn test_unknown_component_is_an_error() {
        let config = sample_config();
        let components = vec!["ghost".to_string()];

        assert!(up_order(&config, &components).is_err());
    }
}
