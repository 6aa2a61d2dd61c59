//! Label rewriting.

use ahash::AHashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::ResultExt as _;
use tracing::trace;

use crate::{
    error::{MatchRuleInvalid, ReporterError},
    sample::{Labels, MetricCategory, Sample},
};

/// How a match rule compares a label value.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// Exact string comparison.
    #[default]
    Equals,

    /// Regular expression that must match the entire value.
    Regex,
}

/// A label match rule, as configured.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchRule {
    /// Label the rule applies to.
    pub label: String,

    /// How `value` is compared against the label value.
    #[serde(rename = "type", default)]
    pub match_type: MatchType,

    /// Value, or pattern, to compare against.
    pub value: String,

    /// Replacement value for matching labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Category the rule is restricted to. Rules without a domain apply to every category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<MetricCategory>,
}

impl MatchRule {
    /// Creates an `EQUALS` rule.
    pub fn equals<L, V>(label: L, value: V) -> Self
    where
        L: Into<String>,
        V: Into<String>,
    {
        Self {
            label: label.into(),
            match_type: MatchType::Equals,
            value: value.into(),
            alias: None,
            domain: None,
        }
    }

    /// Creates a `REGEX` rule.
    pub fn regex<L, V>(label: L, pattern: V) -> Self
    where
        L: Into<String>,
        V: Into<String>,
    {
        Self {
            match_type: MatchType::Regex,
            ..Self::equals(label, pattern)
        }
    }

    /// Sets the alias of this rule.
    pub fn with_alias<A: Into<String>>(mut self, alias: A) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Restricts this rule to the given category.
    pub fn with_domain(mut self, domain: MetricCategory) -> Self {
        self.domain = Some(domain);
        self
    }
}

#[derive(Clone, Debug)]
enum Pattern {
    Equals(String),
    Regex(Regex),
}

impl Pattern {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Equals(expected) => expected == value,
            Self::Regex(re) => re.is_match(value),
        }
    }
}

#[derive(Clone, Debug)]
struct CompiledRule {
    label: String,
    pattern: Pattern,
    alias: Option<String>,
    domain: Option<MetricCategory>,
}

impl CompiledRule {
    fn compile(rule: &MatchRule) -> Result<Self, ReporterError> {
        let pattern = match rule.match_type {
            MatchType::Equals => Pattern::Equals(rule.value.clone()),
            MatchType::Regex => {
                // Anchored so that only whole-value matches apply.
                let anchored = format!("^(?:{})$", rule.value);
                let re = Regex::new(&anchored).context(MatchRuleInvalid {
                    label: rule.label.clone(),
                    pattern: rule.value.clone(),
                })?;
                Pattern::Regex(re)
            }
        };

        Ok(Self {
            label: rule.label.clone(),
            pattern,
            alias: rule.alias.clone(),
            domain: rule.domain,
        })
    }

    fn in_scope(&self, label: &str, category: MetricCategory) -> bool {
        self.label == label && self.domain.map_or(true, |domain| domain == category)
    }
}

/// Rewrites sample labels according to an ordered list of match rules.
///
/// For every label of a sample, rules are scanned in declared order. The first rule that is in scope (same label name,
/// and either no domain or the sample's category as domain) and whose pattern matches the label value wins: if it has
/// an alias, the label value is replaced by the alias. Labels without a winning rule are left untouched.
///
/// In strict mode, a label that has at least one in-scope rule but no matching one causes the whole sample to be
/// rejected. Excluded labels are removed before any rule is evaluated.
#[derive(Clone, Debug, Default)]
pub struct LabelMatcher {
    rules: Vec<CompiledRule>,
    excluded: AHashSet<String>,
    strict: bool,
}

impl LabelMatcher {
    /// Creates a new `LabelMatcher` from the given rules.
    ///
    /// # Errors
    ///
    /// If any `REGEX` rule has a pattern that is not a valid regular expression, an error is returned.
    pub fn new<'a, I>(rules: I) -> Result<Self, ReporterError>
    where
        I: IntoIterator<Item = &'a MatchRule>,
    {
        let rules = rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            excluded: AHashSet::new(),
            strict: false,
        })
    }

    /// Removes the given labels from every sample before matching.
    pub fn with_excluded_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether labels with in-scope but unmatched rules reject the sample.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Returns `true` if this matcher can never change or reject a sample.
    pub fn is_noop(&self) -> bool {
        self.rules.is_empty() && self.excluded.is_empty()
    }

    fn winning_rule(&self, label: &str, value: &str, category: MetricCategory) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .find(|rule| rule.in_scope(label, category) && rule.pattern.matches(value))
    }

    /// Returns `true` if the sample passes strict matching.
    ///
    /// Always `true` when strict mode is disabled.
    pub fn retains(&self, sample: &Sample) -> bool {
        if !self.strict {
            return true;
        }

        let category = sample.category();
        sample
            .labels()
            .iter()
            .filter(|(label, _)| !self.excluded.contains(label.as_str()))
            .all(|(label, value)| {
                let mut scoped = self.rules.iter().filter(|rule| rule.in_scope(label, category)).peekable();
                scoped.peek().is_none() || scoped.any(|rule| rule.pattern.matches(value))
            })
    }

    /// Applies exclusions and rewrite rules to the sample.
    ///
    /// The input is never mutated. If nothing changes, the returned sample shares its labels with the input.
    pub fn apply(&self, sample: &Sample) -> Sample {
        if self.is_noop() {
            return sample.clone();
        }

        let category = sample.category();
        let mut changed = false;
        let mut rewritten = Labels::with_capacity(sample.labels().len());

        for (label, value) in sample.labels() {
            if self.excluded.contains(label.as_str()) {
                changed = true;
                continue;
            }

            match self.winning_rule(label, value, category).and_then(|rule| rule.alias.as_ref()) {
                Some(alias) if alias != value => {
                    trace!(label = %label, value = %value, alias = %alias, "Rewriting label value.");
                    changed = true;
                    rewritten.insert(label.clone(), alias.clone());
                }
                _ => {
                    rewritten.insert(label.clone(), value.clone());
                }
            }
        }

        if changed {
            sample.with_labels(rewritten)
        } else {
            sample.clone()
        }
    }

    /// Applies strict matching, then exclusions and rewrite rules.
    ///
    /// Returns `None` if the sample was rejected.
    pub fn evaluate(&self, sample: &Sample) -> Option<Sample> {
        if self.retains(sample) {
            Some(self.apply(sample))
        } else {
            None
        }
    }
}
