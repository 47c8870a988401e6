//! Parsing of counter event names.
//!
//! Three forms are accepted:
//!
//! - `component:::event:qualifier=value:...` (e.g. `rocm_smi:::temp_current:device=0:sensor=0`)
//! - `component::event:qualifier=value` (e.g. `rapl::RAPL_ENERGY_PKG:cpu=0`)
//! - a bare preset name (e.g. `PAPI_TOT_CYC`)

use std::fmt;
use std::str::FromStr;

use crate::CounterError;

/// A parsed event name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventName {
    /// Component prefix, absent for preset names
    pub component: Option<String>,
    /// `:::` or `::`, as written after the component
    pub separator: &'static str,
    /// Event within the component
    pub event: String,
    /// `key=value` qualifiers in order of appearance. A bare flag has an empty value.
    pub qualifiers: Vec<(String, String)>,
}

impl EventName {
    /// Parses an event name
    ///
    /// # Examples
    ///
    /// ```
    /// use counters::EventName;
    ///
    /// let name = EventName::parse("rocm_smi:::power_average:device=1:sensor=0").unwrap();
    /// assert_eq!(name.component.as_deref(), Some("rocm_smi"));
    /// assert_eq!(name.event, "power_average");
    /// assert_eq!(name.qualifier("device"), Some("1"));
    /// ```
    pub fn parse(name: &str) -> Result<Self, CounterError> {
        let malformed = |reason: &str| CounterError::Parse {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let (component, separator, rest) = match name.split_once(":::") {
            Some((component, rest)) => (Some(component), ":::", rest),
            None => match name.split_once("::") {
                Some((component, rest)) => (Some(component), "::", rest),
                None => (None, "", name),
            },
        };

        if component.is_some_and(str::is_empty) {
            return Err(malformed("empty component"));
        }

        let mut parts = rest.split(':');
        let event = parts.next().unwrap_or_default().trim();
        if event.is_empty() {
            return Err(malformed("empty event"));
        }

        let mut qualifiers = Vec::new();
        for part in parts {
            if part.is_empty() {
                return Err(malformed("empty qualifier"));
            }
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            qualifiers.push((key.to_string(), value.to_string()));
        }

        Ok(Self {
            component: component.map(str::to_string),
            separator,
            event: event.to_string(),
            qualifiers,
        })
    }

    /// Value of a qualifier, if present
    pub fn qualifier(&self, key: &str) -> Option<&str> {
        self.qualifiers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parses a qualifier, falling back to `default` when it is absent
    pub fn qualifier_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, CounterError> {
        match self.qualifier(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| CounterError::Parse {
                name: self.to_string(),
                reason: format!("qualifier {key}={raw:?} is not a valid number"),
            }),
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(component) = &self.component {
            write!(f, "{component}{}", self.separator)?;
        }
        write!(f, "{}", self.event)?;
        for (key, value) in &self.qualifiers {
            if value.is_empty() {
                write!(f, ":{key}")?;
            } else {
                write!(f, ":{key}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("rocm_smi:::busy_percent:device=0", Some("rocm_smi"), "busy_percent", 1)]
    #[case("rapl::RAPL_ENERGY_DRAM:cpu=0", Some("rapl"), "RAPL_ENERGY_DRAM", 1)]
    #[case("rocm:::SQ_INSTS_VALU", Some("rocm"), "SQ_INSTS_VALU", 0)]
    #[case("PAPI_TOT_INS", None, "PAPI_TOT_INS", 0)]
    #[case("perf::CYCLES:u", Some("perf"), "CYCLES", 1)]
    fn test_parse_forms(
        #[case] input: &str,
        #[case] component: Option<&str>,
        #[case] event: &str,
        #[case] n_qualifiers: usize,
    ) {
        let name = EventName::parse(input).unwrap();
        assert_eq!(name.component.as_deref(), component);
        assert_eq!(name.event, event);
        assert_eq!(name.qualifiers.len(), n_qualifiers);
    }

    #[rstest]
    #[case("")]
    #[case(":::busy_percent")]
    #[case("rocm_smi:::")]
    #[case("rocm_smi:::busy_percent::device=0")]
    fn test_parse_rejects_malformed(#[case] input: &str) {
        assert!(matches!(
            EventName::parse(input),
            Err(CounterError::Parse { .. })
        ));
    }

    #[rstest]
    #[case("rocm_smi:::power_average:device=0:sensor=0")]
    #[case("rapl::RAPL_ENERGY_PKG:cpu=0")]
    #[case("perf::CYCLES:u")]
    #[case("PAPI_TOT_CYC")]
    fn test_display_keeps_written_form(#[case] input: &str) {
        assert_eq!(EventName::parse(input).unwrap().to_string(), input);
    }

    #[test]
    fn test_qualifier_defaults_and_errors() {
        let name = EventName::parse("rocm_smi:::temp_current:device=2:sensor=x").unwrap();
        assert_eq!(name.qualifier_or("device", 0u32).unwrap(), 2);
        assert_eq!(name.qualifier_or("missing", 7u32).unwrap(), 7);
        assert!(name.qualifier_or::<u32>("sensor", 0).is_err());
    }
}
