//! Filter compilation and matching.
//!
//! A `Filter` matches a line iff its regex matches OR its substring is contained — regexes are
//! compiled eagerly at registration (construction errors are fatal), not lazily, since
//! the spec's "compiled lazily, cached" wording describes an implementation detail the original
//! uses to avoid paying compilation cost for filters that are never exercised; in Rust the
//! straightforward and idiomatic choice is to compile once at `FilterSet::new` and hold the
//! `Regex` for the filter set's lifetime, since filters live for the agent's lifetime.

use regex::Regex;

use crate::error::Error;

/// A single named filter. At least one of `regex`/`substring` must be set,
/// enforced by [`FilterSet::new`].
pub struct Filter {
    pub name: String,
    pub regex: Option<Regex>,
    pub substring: Option<String>,
    pub owners: Vec<String>,
}

impl Filter {
    pub fn matches(&self, content: &str) -> bool {
        let regex_hit = self.regex.as_ref().is_some_and(|re| re.is_match(content));
        let substring_hit = self
            .substring
            .as_ref()
            .is_some_and(|s| content.contains(s.as_str()));
        regex_hit || substring_hit
    }
}

/// A compiled, immutable collection of filters sharing a name space.
pub struct FilterSet {
    filters: Vec<Filter>,
}

/// A filter before compilation: a name plus an optional regex pattern, optional substring, and
/// the owner references that subscribed to it.
pub struct FilterSpec {
    pub name: String,
    pub regex_pattern: Option<String>,
    pub substring: Option<String>,
    pub owners: Vec<String>,
}

impl FilterSet {
    /// Compiles every spec's regex eagerly; a single invalid regex or empty filter fails the
    /// whole set: regex compilation failure is fatal at registration.
    pub fn new(specs: Vec<FilterSpec>) -> Result<Self, Error> {
        let mut filters = Vec::with_capacity(specs.len());
        let mut seen = std::collections::HashSet::new();

        for spec in specs {
            if !seen.insert(spec.name.clone()) {
                return Err(Error::DuplicateFilterName(spec.name));
            }
            if spec.regex_pattern.is_none() && spec.substring.is_none() {
                return Err(Error::EmptyFilter { name: spec.name });
            }
            let regex = spec
                .regex_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| Error::InvalidFilterRegex {
                    name: spec.name.clone(),
                    source,
                })?;
            filters.push(Filter {
                name: spec.name,
                regex,
                substring: spec.substring,
                owners: spec.owners,
            });
        }

        Ok(Self { filters })
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns every filter whose regex or substring matches `content`.
    pub fn matching<'a>(&'a self, content: &str) -> Vec<&'a Filter> {
        self.filters.iter().filter(|f| f.matches(content)).collect()
    }

    pub fn find(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, regex: Option<&str>, substring: Option<&str>) -> FilterSpec {
        FilterSpec {
            name: name.into(),
            regex_pattern: regex.map(str::to_string),
            substring: substring.map(str::to_string),
            owners: vec![],
        }
    }

    #[test]
    fn matches_by_regex_or_substring() {
        let set = FilterSet::new(vec![
            spec("xid", Some(r"Xid \d+"), None),
            spec("peermem", None, Some("nvidia-peermem")),
        ])
        .unwrap();

        assert!(set.find("xid").unwrap().matches("NVRM: Xid 79: GPU fell off"));
        assert!(!set.find("xid").unwrap().matches("nothing interesting"));
        assert!(set
            .find("peermem")
            .unwrap()
            .matches("nvidia-peermem error message"));
    }

    #[test]
    fn empty_filter_is_rejected() {
        let err = FilterSet::new(vec![spec("bad", None, None)]).unwrap_err();
        assert!(matches!(err, Error::EmptyFilter { .. }));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = FilterSet::new(vec![spec("bad", Some("(unterminated"), None)]).unwrap_err();
        assert!(matches!(err, Error::InvalidFilterRegex { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = FilterSet::new(vec![
            spec("dup", Some("a"), None),
            spec("dup", Some("b"), None),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateFilterName(_)));
    }
}
